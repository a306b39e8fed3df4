// src/core/postgres/observe.rs

//! Read-only introspection of the local instance. Observation never
//! fails the calling loop: on any error it degrades to "not running"
//! defaults and the error is logged.

use crate::core::errors::StewardError;
use crate::core::lsn::Lsn;
use crate::core::postgres::control::{PostgresController, PostgresSetup};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// A snapshot of the local instance as reported to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub pg_is_running: bool,
    pub is_in_recovery: bool,
    /// Current WAL write position on a primary, last replay position on
    /// a standby. Invalid when unknown.
    pub current_lsn: Lsn,
    pub timeline: i32,
    /// The best sync state among attached standbys on a primary
    /// ("sync" > "potential" > "async"), empty on a standby.
    pub sync_state: String,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            pg_is_running: false,
            is_in_recovery: false,
            current_lsn: Lsn::INVALID,
            timeline: 0,
            sync_state: String::new(),
        }
    }
}

/// The cluster-identity values from `pg_control_system()`, used as the
/// compatibility fingerprint in the persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlData {
    pub system_identifier: u64,
    pub pg_control_version: u32,
    pub catalog_version: u32,
    pub server_version: u32,
}

/// Observes the local instance. Never returns an error; a failed probe
/// yields the "not running" defaults.
pub async fn observe(controller: &PostgresController) -> Observation {
    if !controller.is_running() {
        return Observation::default();
    }
    match probe(controller.setup()).await {
        Ok(observation) => observation,
        Err(e) => {
            warn!("local observation failed, reporting postgres as not ready: {e}");
            Observation::default()
        }
    }
}

async fn probe(setup: &PostgresSetup) -> Result<Observation, StewardError> {
    let client = connect_local(setup).await?;

    let row = client
        .query_one(
            "SELECT pg_is_in_recovery() AS in_recovery, \
                    CASE WHEN pg_is_in_recovery() \
                         THEN COALESCE(pg_last_wal_replay_lsn()::text, '') \
                         ELSE pg_current_wal_lsn()::text \
                    END AS lsn, \
                    (SELECT timeline_id FROM pg_control_checkpoint())::int AS timeline",
            &[],
        )
        .await
        .map_err(|e| StewardError::PgProtocol(e.to_string()))?;

    let is_in_recovery: bool = get(&row, "in_recovery")?;
    let lsn_text: String = get(&row, "lsn")?;
    let timeline: i32 = get(&row, "timeline")?;

    let current_lsn = if lsn_text.is_empty() {
        Lsn::INVALID
    } else {
        lsn_text
            .parse()
            .map_err(|e: String| StewardError::PgProtocol(e))?
    };

    let sync_state = if is_in_recovery {
        String::new()
    } else {
        best_sync_state(&client).await?
    };

    Ok(Observation {
        pg_is_running: true,
        is_in_recovery,
        current_lsn,
        timeline,
        sync_state,
    })
}

/// Reads the cluster fingerprint. Unlike [`observe`] this propagates
/// errors: callers need the fingerprint to validate state consistency.
pub async fn control_data(setup: &PostgresSetup) -> Result<ControlData, StewardError> {
    let client = connect_local(setup).await?;
    let row = client
        .query_one(
            "SELECT system_identifier::text, pg_control_version::int, catalog_version_no::int, \
                    current_setting('server_version_num')::int AS server_version \
             FROM pg_control_system()",
            &[],
        )
        .await
        .map_err(|e| StewardError::PgProtocol(e.to_string()))?;

    let system_identifier: String = get(&row, "system_identifier")?;
    Ok(ControlData {
        system_identifier: system_identifier
            .parse()
            .map_err(|e| StewardError::PgProtocol(format!("bad system identifier: {e}")))?,
        pg_control_version: get::<i32>(&row, "pg_control_version")? as u32,
        catalog_version: get::<i32>(&row, "catalog_version_no")? as u32,
        server_version: get::<i32>(&row, "server_version")? as u32,
    })
}

/// Polls whether the instance currently accepts writes.
pub async fn accepts_writes(setup: &PostgresSetup) -> Result<bool, StewardError> {
    let client = connect_local(setup).await?;
    let row = client
        .query_one("SELECT NOT pg_is_in_recovery() AS writable", &[])
        .await
        .map_err(|e| StewardError::PgProtocol(e.to_string()))?;
    get(&row, "writable")
}

/// Pauses WAL replay on a standby, detaching it from its upstream
/// without a restart. Idempotent.
pub async fn pause_wal_replay(setup: &PostgresSetup) -> Result<(), StewardError> {
    let client = connect_local(setup).await?;
    client
        .batch_execute("SELECT pg_wal_replay_pause()")
        .await
        .map_err(|e| StewardError::PgProtocol(format!("pg_wal_replay_pause failed: {e}")))
}

/// Resumes WAL replay on a standby. Idempotent.
pub async fn resume_wal_replay(setup: &PostgresSetup) -> Result<(), StewardError> {
    let client = connect_local(setup).await?;
    client
        .batch_execute("SELECT pg_wal_replay_resume()")
        .await
        .map_err(|e| StewardError::PgProtocol(format!("pg_wal_replay_resume failed: {e}")))
}

async fn best_sync_state(client: &Client) -> Result<String, StewardError> {
    let rows = client
        .query("SELECT sync_state FROM pg_stat_replication", &[])
        .await
        .map_err(|e| StewardError::PgProtocol(e.to_string()))?;
    let mut best_rank = 0;
    for row in &rows {
        let state: String = row
            .try_get("sync_state")
            .map_err(|e| StewardError::PgProtocol(e.to_string()))?;
        best_rank = best_rank.max(sync_state_rank(&state));
    }
    Ok(match best_rank {
        3 => "sync",
        2 => "potential",
        1 => "async",
        _ => "",
    }
    .to_string())
}

fn sync_state_rank(state: &str) -> u8 {
    match state {
        "sync" => 3,
        "potential" | "quorum" => 2,
        "async" => 1,
        _ => 0,
    }
}

async fn connect_local(setup: &PostgresSetup) -> Result<Client, StewardError> {
    let (client, connection) = tokio_postgres::connect(&setup.local_connection_string(), NoTls)
        .await
        .map_err(|e| StewardError::PgProtocol(format!("local connection failed: {e}")))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("local connection closed: {e}");
        }
    });
    Ok(client)
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    column: &str,
) -> Result<T, StewardError> {
    row.try_get(column)
        .map_err(|e| StewardError::PgProtocol(format!("bad column \"{column}\": {e}")))
}
