// src/core/monitor/client.rs

//! The synchronous RPC half of the monitor connection: every call is a
//! single `SELECT * FROM steward.<fn>(...)` exchange, wrapped in the
//! retry discipline of [`super::retry`].

use crate::core::errors::StewardError;
use crate::core::lsn::Lsn;
use crate::core::monitor::protocol::{AssignedState, MAX_NODES_PER_GROUP, NodeAddress};
use crate::core::monitor::retry::{RetryPolicy, Retrier, is_transient_pg_error};
use crate::core::roles::Role;
use futures::StreamExt;
use tokio_postgres::types::ToSql;
use tokio_postgres::{AsyncMessage, Client, NoTls, Row};
use tracing::{debug, info, warn};

/// The monitor extension version this keeper expects.
pub const EXPECTED_EXTENSION_VERSION: &str = "1.2";

/// Inputs to `steward.register_node`.
#[derive(Debug, Clone)]
pub struct RegisterNodeRequest {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub system_identifier: u64,
    pub desired_group_id: i32,
    pub desired_node_id: i64,
    pub desired_node_name: Option<String>,
    pub initial_role: Role,
    /// The kind of instance managed on this node, e.g. "standalone".
    pub node_kind: String,
    pub candidate_priority: i32,
    pub replication_quorum: bool,
}

/// Inputs to `steward.node_active`.
#[derive(Debug, Clone)]
pub struct NodeActiveRequest {
    pub node_id: i64,
    pub group_id: i32,
    pub current_role: Role,
    pub pg_is_running: bool,
    pub current_lsn: Lsn,
    pub timeline: i32,
    pub sync_state: String,
}

/// A typed client over the monitor's RPC functions. One instance owns one
/// connection; a lost connection is re-established transparently inside
/// the retry loop.
pub struct MonitorClient {
    uri: String,
    formation: String,
    client: Client,
    extension_update_attempted: bool,
}

impl MonitorClient {
    /// Connects under the interactive policy, so a monitor restart
    /// window at keeper startup is ridden out rather than fatal.
    pub async fn connect(monitor_uri: &str, formation: &str) -> Result<Self, StewardError> {
        let mut retrier = Retrier::new(RetryPolicy::interactive());
        let client = loop {
            match connect_raw(monitor_uri).await {
                Ok(client) => break client,
                Err(e) => match retrier.next_delay() {
                    Some(delay) => {
                        debug!("monitor connection failed ({e}), retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        };
        info!("connected to monitor at {}", sanitized(monitor_uri));
        Ok(Self {
            uri: monitor_uri.to_string(),
            formation: formation.to_string(),
            client,
            extension_update_attempted: false,
        })
    }

    pub fn formation(&self) -> &str {
        &self.formation
    }

    /// Registers this node, committing the monitor-side transaction only
    /// after `persist` has durably recorded the assignment locally. When
    /// `persist` fails the transaction is rolled back, so a crashed or
    /// failed registration can simply be retried from scratch.
    pub async fn register_node_with<F>(
        &mut self,
        request: &RegisterNodeRequest,
        persist: F,
    ) -> Result<AssignedState, StewardError>
    where
        F: Fn(&AssignedState) -> Result<(), StewardError>,
    {
        let mut retrier = Retrier::new(RetryPolicy::interactive());
        loop {
            match self.try_register(request, &persist).await {
                Ok(assigned) => return Ok(assigned),
                Err(RpcError::Transient(e)) => match retrier.next_delay() {
                    Some(delay) => {
                        debug!(
                            "register_node attempt {} failed ({e}), retrying in {:?}",
                            retrier.attempts(),
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(StewardError::RetriesExhausted(
                            "registering with the monitor".to_string(),
                        ));
                    }
                },
                Err(RpcError::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn try_register<F>(
        &mut self,
        request: &RegisterNodeRequest,
        persist: &F,
    ) -> Result<AssignedState, RpcError>
    where
        F: Fn(&AssignedState) -> Result<(), StewardError>,
    {
        self.ensure_connected().await?;
        let tx = self.client.transaction().await.map_err(RpcError::from)?;
        let row = tx
            .query_one(
                "SELECT * FROM steward.register_node($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &self.formation,
                    &request.host,
                    &(request.port as i32),
                    &request.dbname,
                    &(request.system_identifier as i64),
                    &request.desired_group_id,
                    &request.desired_node_id,
                    &request.desired_node_name,
                    &request.initial_role.to_string(),
                    &request.node_kind,
                    &request.candidate_priority,
                ],
            )
            .await
            .map_err(RpcError::from)?;
        let assigned = AssignedState::from_row(&row).map_err(RpcError::Fatal)?;

        // The quorum flag is set in the same transaction so a crash cannot
        // leave a half-registered node behind.
        tx.execute(
            "SELECT steward.set_node_replication_quorum($1, $2)",
            &[&assigned.node_id, &request.replication_quorum],
        )
        .await
        .map_err(RpcError::from)?;

        // Local write first; dropping the transaction on failure rolls
        // the registration back on the monitor.
        persist(&assigned).map_err(RpcError::Fatal)?;
        tx.commit().await.map_err(RpcError::from)?;
        Ok(assigned)
    }

    /// The periodic report of this node's observed state. Runs under the
    /// service policy: unbounded retries while the keeper is alive.
    pub async fn node_active(
        &mut self,
        request: &NodeActiveRequest,
    ) -> Result<AssignedState, StewardError> {
        let lsn_text = request.current_lsn.to_string();
        let role_text = request.current_role.to_string();
        let row = self
            .query_one(
                RetryPolicy::service(),
                "node_active",
                "SELECT * FROM steward.node_active($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &self.formation.clone(),
                    &request.node_id,
                    &request.group_id,
                    &role_text,
                    &request.pg_is_running,
                    &request.timeline,
                    &lsn_text,
                    &request.sync_state,
                ],
            )
            .await?;
        AssignedState::from_row(&row)
    }

    pub async fn remove_node(&mut self, node_id: i64) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "remove_node",
            "SELECT steward.remove_node($1)",
            &[&node_id],
        )
        .await?;
        Ok(())
    }

    /// The current primary of a group, if the monitor knows one.
    pub async fn get_primary(&mut self, group_id: i32) -> Result<Option<NodeAddress>, StewardError> {
        let rows = self
            .query(
                RetryPolicy::service(),
                "get_primary",
                "SELECT * FROM steward.get_primary($1, $2)",
                &[&self.formation.clone(), &group_id],
            )
            .await?;
        rows.first().map(NodeAddress::from_row).transpose()
    }

    /// Every other node of this node's group.
    pub async fn get_other_nodes(
        &mut self,
        node_id: i64,
    ) -> Result<Vec<NodeAddress>, StewardError> {
        let rows = self
            .query(
                RetryPolicy::service(),
                "get_other_nodes",
                "SELECT * FROM steward.get_other_nodes($1)",
                &[&node_id],
            )
            .await?;
        let mut nodes = rows
            .iter()
            .map(NodeAddress::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if nodes.len() > MAX_NODES_PER_GROUP {
            warn!(
                "monitor returned {} nodes for one group, keeping the first {MAX_NODES_PER_GROUP}",
                nodes.len()
            );
            nodes.truncate(MAX_NODES_PER_GROUP);
        }
        Ok(nodes)
    }

    pub async fn get_coordinator(&mut self) -> Result<Option<(String, u16)>, StewardError> {
        let rows = self
            .query(
                RetryPolicy::service(),
                "get_coordinator",
                "SELECT * FROM steward.get_coordinator($1)",
                &[&self.formation.clone()],
            )
            .await?;
        match rows.first() {
            None => Ok(None),
            Some(row) => {
                let host: String = row
                    .try_get("coordinator_host")
                    .map_err(|e| StewardError::MonitorProtocol(e.to_string()))?;
                let port: i32 = row
                    .try_get("coordinator_port")
                    .map_err(|e| StewardError::MonitorProtocol(e.to_string()))?;
                Ok(Some((host, port as u16)))
            }
        }
    }

    /// The standby with the most advanced replay position, used as the
    /// WAL source for `fast_forward`.
    pub async fn get_most_advanced_standby(
        &mut self,
        group_id: i32,
    ) -> Result<Option<NodeAddress>, StewardError> {
        let rows = self
            .query(
                RetryPolicy::service(),
                "get_most_advanced_standby",
                "SELECT * FROM steward.get_most_advanced_standby($1, $2)",
                &[&self.formation.clone(), &group_id],
            )
            .await?;
        rows.first().map(NodeAddress::from_row).transpose()
    }

    pub async fn start_maintenance(&mut self, node_id: i64) -> Result<bool, StewardError> {
        let row = self
            .query_one(
                RetryPolicy::interactive(),
                "start_maintenance",
                "SELECT steward.start_maintenance($1) AS ok",
                &[&node_id],
            )
            .await?;
        row.try_get("ok")
            .map_err(|e| StewardError::MonitorProtocol(e.to_string()))
    }

    pub async fn stop_maintenance(&mut self, node_id: i64) -> Result<bool, StewardError> {
        let row = self
            .query_one(
                RetryPolicy::interactive(),
                "stop_maintenance",
                "SELECT steward.stop_maintenance($1) AS ok",
                &[&node_id],
            )
            .await?;
        row.try_get("ok")
            .map_err(|e| StewardError::MonitorProtocol(e.to_string()))
    }

    pub async fn perform_failover(&mut self, group_id: i32) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "perform_failover",
            "SELECT steward.perform_failover($1, $2)",
            &[&self.formation.clone(), &group_id],
        )
        .await?;
        Ok(())
    }

    pub async fn perform_promotion(
        &mut self,
        group_id: i32,
        node_name: &str,
    ) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "perform_promotion",
            "SELECT steward.perform_promotion($1, $2, $3)",
            &[&self.formation.clone(), &group_id, &node_name],
        )
        .await?;
        Ok(())
    }

    pub async fn enable_secondary(&mut self) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "enable_secondary",
            "SELECT steward.enable_secondary($1)",
            &[&self.formation.clone()],
        )
        .await?;
        Ok(())
    }

    pub async fn disable_secondary(&mut self) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "disable_secondary",
            "SELECT steward.disable_secondary($1)",
            &[&self.formation.clone()],
        )
        .await?;
        Ok(())
    }

    pub async fn set_node_candidate_priority(
        &mut self,
        node_id: i64,
        priority: i32,
    ) -> Result<(), StewardError> {
        if !(0..=100).contains(&priority) {
            return Err(StewardError::BadArgs(format!(
                "candidate priority {priority} is outside 0..100"
            )));
        }
        self.query(
            RetryPolicy::interactive(),
            "set_node_candidate_priority",
            "SELECT steward.set_node_candidate_priority($1, $2)",
            &[&node_id, &priority],
        )
        .await?;
        Ok(())
    }

    pub async fn set_node_replication_quorum(
        &mut self,
        node_id: i64,
        quorum: bool,
    ) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "set_node_replication_quorum",
            "SELECT steward.set_node_replication_quorum($1, $2)",
            &[&node_id, &quorum],
        )
        .await?;
        Ok(())
    }

    pub async fn get_formation_number_sync_standbys(&mut self) -> Result<i32, StewardError> {
        let row = self
            .query_one(
                RetryPolicy::interactive(),
                "get_formation_number_sync_standbys",
                "SELECT steward.get_formation_number_sync_standbys($1) AS number_sync_standbys",
                &[&self.formation.clone()],
            )
            .await?;
        row.try_get("number_sync_standbys")
            .map_err(|e| StewardError::MonitorProtocol(e.to_string()))
    }

    pub async fn set_formation_number_sync_standbys(
        &mut self,
        number_sync_standbys: i32,
    ) -> Result<(), StewardError> {
        self.query(
            RetryPolicy::interactive(),
            "set_formation_number_sync_standbys",
            "SELECT steward.set_formation_number_sync_standbys($1, $2)",
            &[&self.formation.clone(), &number_sync_standbys],
        )
        .await?;
        Ok(())
    }

    /// The value the primary should install as
    /// `synchronous_standby_names`, computed by the monitor.
    pub async fn synchronous_standby_names(
        &mut self,
        group_id: i32,
    ) -> Result<String, StewardError> {
        let row = self
            .query_one(
                RetryPolicy::service(),
                "synchronous_standby_names",
                "SELECT steward.synchronous_standby_names($1, $2) AS sslist",
                &[&self.formation.clone(), &group_id],
            )
            .await?;
        row.try_get("sslist")
            .map_err(|e| StewardError::MonitorProtocol(e.to_string()))
    }

    /// Checks the monitor extension version, attempting one in-place
    /// upgrade as the extension owner. A mismatch after the attempt is
    /// fatal for the process.
    pub async fn ensure_extension_version(&mut self) -> Result<(), StewardError> {
        let row = self
            .query_one(
                RetryPolicy::interactive(),
                "extension_version",
                "SELECT extversion FROM pg_extension WHERE extname = 'steward'",
                &[],
            )
            .await?;
        let installed: String = row
            .try_get("extversion")
            .map_err(|e| StewardError::MonitorProtocol(e.to_string()))?;
        if installed == EXPECTED_EXTENSION_VERSION {
            return Ok(());
        }

        if self.extension_update_attempted {
            return Err(StewardError::ExtensionMismatch {
                installed,
                expected: EXPECTED_EXTENSION_VERSION.to_string(),
            });
        }
        self.extension_update_attempted = true;
        warn!(
            "monitor extension is version {installed}, expected {EXPECTED_EXTENSION_VERSION}; \
             attempting in-place update"
        );
        self.query(
            RetryPolicy::interactive(),
            "alter_extension_update_to",
            &format!("ALTER EXTENSION steward UPDATE TO '{EXPECTED_EXTENSION_VERSION}'"),
            &[],
        )
        .await?;
        Box::pin(self.ensure_extension_version()).await
    }

    // --- plumbing ---

    async fn ensure_connected(&mut self) -> Result<(), RpcError> {
        if self.client.is_closed() {
            debug!("monitor connection lost, reconnecting");
            self.client = connect_raw(&self.uri).await.map_err(RpcError::Fatal)?;
        }
        Ok(())
    }

    async fn query(
        &mut self,
        policy: RetryPolicy,
        operation: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StewardError> {
        let mut retrier = Retrier::new(policy);
        loop {
            let attempt = async {
                self.ensure_connected().await?;
                self.client.query(sql, params).await.map_err(RpcError::from)
            }
            .await;
            match attempt {
                Ok(rows) => return Ok(rows),
                Err(RpcError::Transient(e)) => match retrier.next_delay() {
                    Some(delay) => {
                        debug!(
                            "{operation} attempt {} failed ({e}), retrying in {:?}",
                            retrier.attempts(),
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(StewardError::RetriesExhausted(format!(
                            "calling {operation}"
                        )));
                    }
                },
                Err(RpcError::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn query_one(
        &mut self,
        policy: RetryPolicy,
        operation: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, StewardError> {
        let rows = self.query(policy, operation, sql, params).await?;
        match rows.len() {
            1 => Ok(rows.into_iter().next().expect("len checked")),
            n => Err(StewardError::MonitorProtocol(format!(
                "{operation} returned {n} rows, expected exactly one"
            ))),
        }
    }
}

/// Internal split between errors worth another attempt and errors that
/// must surface immediately.
enum RpcError {
    Transient(tokio_postgres::Error),
    Fatal(StewardError),
}

impl From<tokio_postgres::Error> for RpcError {
    fn from(e: tokio_postgres::Error) -> Self {
        if is_transient_pg_error(&e) {
            RpcError::Transient(e)
        } else if let Some(db_error) = e.as_db_error() {
            RpcError::Fatal(StewardError::MonitorRejected(db_error.message().to_string()))
        } else {
            RpcError::Fatal(StewardError::MonitorProtocol(e.to_string()))
        }
    }
}

async fn connect_raw(uri: &str) -> Result<Client, StewardError> {
    let (client, mut connection) = tokio_postgres::connect(uri, NoTls)
        .await
        .map_err(|e| StewardError::MonitorUnreachable(e.to_string()))?;
    tokio::spawn(async move {
        let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx)).boxed();
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notice(notice)) => {
                    debug!("monitor notice: {}", notice.message());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("monitor RPC connection closed: {e}");
                    return;
                }
            }
        }
    });
    Ok(client)
}

/// Strips credentials from a monitor URI before it reaches the logs.
fn sanitized(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => uri.to_string(),
    }
}
