// src/core/monitor/notifications.rs

//! The asynchronous state-change channel: a dedicated LISTEN/NOTIFY
//! connection to the monitor, and the codec for `state` payloads.
//!
//! Delivery is at-least-once with best-effort ordering; consumers treat a
//! notification as a hint to wake early, never as the authoritative state.

use crate::core::errors::StewardError;
use crate::core::monitor::protocol::NodeHealth;
use crate::core::roles::Role;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, NoTls};
use tracing::{debug, error, info, warn};

/// Channel carrying structured state-change payloads.
pub const CHANNEL_STATE: &str = "state";
/// Channel carrying free-form monitor log lines.
pub const CHANNEL_LOG: &str = "log";

/// A raw notification as received from the monitor.
#[derive(Debug, Clone)]
pub struct MonitorNotification {
    pub channel: String,
    pub payload: String,
}

/// A state change reported by the monitor on the `state` channel.
///
/// Two wire encodings exist: a JSON object and a positional
/// colon-separated record with length-prefixed strings. Both are parsed;
/// the positional form is the one emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNotification {
    pub formation_id: String,
    pub group_id: i32,
    pub node_id: i64,
    pub node_name: String,
    pub host: String,
    pub port: u16,
    pub reported_state: Role,
    pub goal_state: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<NodeHealth>,
}

impl StateNotification {
    /// Parses either encoding, sniffing JSON by its leading brace.
    pub fn parse(payload: &str) -> Result<Self, StewardError> {
        if payload.trim_start().starts_with('{') {
            Ok(serde_json::from_str(payload)?)
        } else {
            Self::parse_positional(payload)
        }
    }

    /// Parses the positional form:
    /// `S:<reported>:<goal>:<len>.<formationId>:<groupId>:<nodeId>:<len>.<name>:<len>.<host>:<port>`
    pub fn parse_positional(payload: &str) -> Result<Self, StewardError> {
        let mut cursor = Cursor::new(payload);
        let kind = cursor.field()?;
        if kind != "S" {
            return Err(bad_payload(payload, "expected leading 'S'"));
        }
        let reported_state = role_field(&cursor.field()?, payload)?;
        let goal_state = role_field(&cursor.field()?, payload)?;
        let formation_id = cursor.sized_field()?;
        let group_id = cursor
            .field()?
            .parse()
            .map_err(|_| bad_payload(payload, "group id"))?;
        let node_id = cursor
            .field()?
            .parse()
            .map_err(|_| bad_payload(payload, "node id"))?;
        let node_name = cursor.sized_field()?;
        let host = cursor.sized_field()?;
        let port = cursor
            .rest()
            .parse()
            .map_err(|_| bad_payload(payload, "port"))?;
        Ok(Self {
            formation_id,
            group_id,
            node_id,
            node_name,
            host,
            port,
            reported_state,
            goal_state,
            health: None,
        })
    }

    /// Emits the canonical positional encoding.
    pub fn to_positional(&self) -> String {
        format!(
            "S:{}:{}:{}.{}:{}:{}:{}.{}:{}.{}:{}",
            self.reported_state,
            self.goal_state,
            self.formation_id.len(),
            self.formation_id,
            self.group_id,
            self.node_id,
            self.node_name.len(),
            self.node_name,
            self.host.len(),
            self.host,
            self.port
        )
    }

    /// Whether this notification concerns the given node.
    pub fn concerns(&self, formation: &str, group_id: i32, node_id: i64) -> bool {
        self.formation_id == formation && self.group_id == group_id && self.node_id == node_id
    }

    /// Whether this notification concerns any node of the given group.
    pub fn concerns_group(&self, formation: &str, group_id: i32) -> bool {
        self.formation_id == formation && self.group_id == group_id
    }
}

fn role_field(text: &str, payload: &str) -> Result<Role, StewardError> {
    text.parse()
        .map_err(|_| bad_payload(payload, "unknown role"))
}

fn bad_payload(payload: &str, what: &str) -> StewardError {
    StewardError::MonitorProtocol(format!("malformed state payload ({what}): \"{payload}\""))
}

/// A cursor over the positional payload. Plain fields end at the next
/// colon; sized fields are `<len>.<bytes>` and may contain colons.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(payload: &'a str) -> Self {
        Self { rest: payload }
    }

    fn field(&mut self) -> Result<String, StewardError> {
        match self.rest.split_once(':') {
            Some((field, rest)) => {
                self.rest = rest;
                Ok(field.to_string())
            }
            None => Err(StewardError::MonitorProtocol(
                "truncated state payload".to_string(),
            )),
        }
    }

    fn sized_field(&mut self) -> Result<String, StewardError> {
        let (len, rest) = self.rest.split_once('.').ok_or_else(|| {
            StewardError::MonitorProtocol("missing length prefix in state payload".to_string())
        })?;
        let len: usize = len.parse().map_err(|_| {
            StewardError::MonitorProtocol(format!("bad length prefix \"{len}\" in state payload"))
        })?;
        if rest.len() < len {
            return Err(StewardError::MonitorProtocol(
                "length prefix overruns state payload".to_string(),
            ));
        }
        let (value, rest) = rest.split_at(len);
        // A sized field is followed by a separator unless it ends the payload.
        self.rest = rest.strip_prefix(':').unwrap_or(rest);
        Ok(value.to_string())
    }

    fn rest(&self) -> &str {
        self.rest
    }
}

/// The long-lived subscriber connection. This connection is never used
/// for RPC; it only drains notifications.
pub struct NotificationListener {
    // Dropping the client would close the subscription, so it is held
    // for the listener's lifetime.
    _client: tokio_postgres::Client,
    receiver: mpsc::UnboundedReceiver<MonitorNotification>,
}

impl NotificationListener {
    /// Connects to the monitor and subscribes to the given channels.
    pub async fn connect(monitor_uri: &str, channels: &[&str]) -> Result<Self, StewardError> {
        let (client, mut connection) = tokio_postgres::connect(monitor_uri, NoTls)
            .await
            .map_err(|e| StewardError::MonitorUnreachable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut messages =
                futures::stream::poll_fn(move |cx| connection.poll_message(cx)).boxed();
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        let forwarded = tx.send(MonitorNotification {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                        });
                        if forwarded.is_err() {
                            // Listener dropped; stop driving the connection.
                            return;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        debug!("monitor notice: {}", notice.message());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("notification connection lost: {e}");
                        return;
                    }
                }
            }
        });

        for channel in channels {
            client
                .batch_execute(&format!("LISTEN {channel}"))
                .await
                .map_err(|e| StewardError::MonitorUnreachable(e.to_string()))?;
        }
        info!("subscribed to monitor channels: {}", channels.join(", "));

        Ok(Self {
            _client: client,
            receiver: rx,
        })
    }

    /// Waits for the next notification. `None` means the subscriber
    /// connection is gone and the caller should resubscribe.
    pub async fn recv(&mut self) -> Option<MonitorNotification> {
        self.receiver.recv().await
    }

    /// Drains whatever notifications are already buffered, non-blocking.
    pub fn try_drain(&mut self) -> Vec<MonitorNotification> {
        let mut drained = Vec::new();
        while let Ok(n) = self.receiver.try_recv() {
            drained.push(n);
        }
        drained
    }

    /// Blocks until a `state` notification satisfies `predicate` or the
    /// timeout elapses. Non-state channels are logged and skipped.
    pub async fn wait_until<P>(
        &mut self,
        timeout: Duration,
        predicate: P,
    ) -> Result<Option<StateNotification>, StewardError>
    where
        P: Fn(&StateNotification) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notification = match tokio::time::timeout_at(deadline, self.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    return Err(StewardError::MonitorUnreachable(
                        "notification subscription closed".to_string(),
                    ));
                }
                Ok(Some(n)) => n,
            };
            match parse_if_state(&notification) {
                Some(Ok(state)) => {
                    if predicate(&state) {
                        return Ok(Some(state));
                    }
                }
                Some(Err(e)) => warn!("ignoring malformed state notification: {e}"),
                None => {}
            }
        }
    }
}

/// Parses a notification when it belongs to the `state` channel, logging
/// every message at info level on the way through.
pub fn parse_if_state(
    notification: &MonitorNotification,
) -> Option<Result<StateNotification, StewardError>> {
    match notification.channel.as_str() {
        CHANNEL_STATE => {
            info!("monitor state change: {}", notification.payload);
            Some(StateNotification::parse(&notification.payload))
        }
        CHANNEL_LOG => {
            info!("monitor: {}", notification.payload);
            None
        }
        other => {
            info!("notification on unknown channel \"{other}\" skipped");
            None
        }
    }
}
