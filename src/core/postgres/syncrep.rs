// src/core/postgres/syncrep.rs

//! Synchronous-replication parameter management on the primary. The
//! standby list itself is computed by the monitor; this module installs
//! it and reloads the server.

use crate::core::errors::StewardError;
use crate::core::postgres::control::{PostgresController, PostgresSetup};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Formats a `synchronous_standby_names` value from a standby-name list.
/// An empty list yields the empty string (synchronous replication off).
pub fn format_synchronous_standby_names(number_sync_standbys: i32, names: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = names.iter().map(|name| quote_ident(name)).collect();
    format!(
        "ANY {} ({})",
        number_sync_standbys.max(1),
        quoted.join(", ")
    )
}

/// Quotes a standby name the way Postgres expects identifiers in
/// `synchronous_standby_names`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Installs the given `synchronous_standby_names` value and reloads.
pub async fn set_synchronous_standby_names(
    controller: &PostgresController,
    value: &str,
) -> Result<(), StewardError> {
    info!("setting synchronous_standby_names to '{value}'");
    alter_system(controller.setup(), "synchronous_standby_names", value).await?;
    controller.reload().await
}

/// Turns synchronous replication off entirely.
pub async fn disable_synchronous_replication(
    controller: &PostgresController,
) -> Result<(), StewardError> {
    debug!("disabling synchronous replication");
    set_synchronous_standby_names(controller, "").await
}

async fn alter_system(
    setup: &PostgresSetup,
    parameter: &str,
    value: &str,
) -> Result<(), StewardError> {
    let (client, connection) = tokio_postgres::connect(&setup.local_connection_string(), NoTls)
        .await
        .map_err(|e| StewardError::PgProtocol(format!("local connection failed: {e}")))?;
    tokio::spawn(async move {
        let _ = connection.await;
    });

    // ALTER SYSTEM does not take bind parameters; the value is escaped as
    // a string literal.
    let literal = value.replace('\'', "''");
    client
        .batch_execute(&format!("ALTER SYSTEM SET {parameter} = '{literal}'"))
        .await
        .map_err(|e| StewardError::PgProtocol(format!("ALTER SYSTEM {parameter} failed: {e}")))?;
    Ok(())
}
