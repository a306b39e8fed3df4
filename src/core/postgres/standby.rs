// src/core/postgres/standby.rs

//! Standby provisioning: rewinding or re-seeding the data directory from
//! an upstream node, and pointing replication at it.

use crate::core::errors::StewardError;
use crate::core::lsn::Lsn;
use crate::core::monitor::protocol::NodeAddress;
use crate::core::postgres::control::{PostgresController, PostgresSetup, StopMode, run_tool};
use crate::core::postgres::observe;
use std::time::Duration;
use tracing::{info, warn};

/// How to (re)build the local data directory from the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyInitMode {
    /// `pg_rewind` only; fails when histories do not match.
    Rewind,
    /// Full base backup only.
    Basebackup,
    /// Try a rewind first, fall back to a full base backup.
    Fallback,
}

/// Knobs for standby provisioning, from configuration.
#[derive(Debug, Clone)]
pub struct StandbyOptions {
    /// `pg_basebackup --max-rate` ceiling, e.g. "100M".
    pub maximum_backup_rate: String,
    /// Operator override allowing a partially populated data directory
    /// to be re-seeded in place.
    pub allow_nonempty_directory: bool,
    /// The `application_name` this standby presents to its upstream;
    /// must match what the monitor puts in `synchronous_standby_names`.
    pub application_name: String,
}

/// Builds (or rebuilds) the local directory as a standby of `upstream`
/// and installs the replication configuration. Idempotent over the data
/// directory: a completed standby setup can be run again safely.
pub async fn init_standby(
    controller: &PostgresController,
    upstream: &NodeAddress,
    mode: StandbyInitMode,
    options: &StandbyOptions,
) -> Result<(), StewardError> {
    controller.stop(StopMode::Fast).await?;

    match mode {
        StandbyInitMode::Rewind => rewind(controller.setup(), upstream).await?,
        StandbyInitMode::Basebackup => basebackup(controller, upstream, options).await?,
        StandbyInitMode::Fallback => {
            if let Err(e) = rewind(controller.setup(), upstream).await {
                warn!("rewind from {} failed ({e}), falling back to base backup", upstream.name);
                basebackup(controller, upstream, options).await?;
            }
        }
    }

    write_replication_configuration(controller.setup(), upstream, options)?;
    Ok(())
}

/// Rewinds the local directory onto the upstream's timeline. Requires a
/// local history: an empty directory cannot be rewound.
pub async fn rewind(setup: &PostgresSetup, upstream: &NodeAddress) -> Result<(), StewardError> {
    if !setup.pgdata.join("PG_VERSION").exists() {
        return Err(StewardError::PgTooling(
            "cannot rewind an empty data directory".to_string(),
        ));
    }
    info!("rewinding {} from {}", setup.pgdata.display(), upstream.name);
    let args = vec![
        format!("--target-pgdata={}", setup.pgdata.display()),
        format!(
            "--source-server={}",
            upstream.connection_string(&setup.dbname)
        ),
        "--progress".to_string(),
    ];
    run_tool(&setup.pg_rewind, &args).await
}

/// Takes a fresh base backup from the upstream, rate-limited by the
/// configured ceiling. The directory must be empty unless the operator
/// override allows wiping a partial one.
pub async fn basebackup(
    controller: &PostgresController,
    upstream: &NodeAddress,
    options: &StandbyOptions,
) -> Result<(), StewardError> {
    let setup = controller.setup();
    if !controller.data_directory_is_empty() {
        if !options.allow_nonempty_directory {
            return Err(StewardError::PgTooling(format!(
                "data directory {} is not empty; refusing to overwrite it",
                setup.pgdata.display()
            )));
        }
        warn!(
            "removing existing contents of {} before base backup",
            setup.pgdata.display()
        );
        std::fs::remove_dir_all(&setup.pgdata)?;
    }
    std::fs::create_dir_all(&setup.pgdata)?;

    info!(
        "taking base backup from {} ({}:{})",
        upstream.name, upstream.host, upstream.port
    );
    let args = vec![
        "-D".to_string(),
        setup.pgdata.display().to_string(),
        "-h".to_string(),
        upstream.host.clone(),
        "-p".to_string(),
        upstream.port.to_string(),
        "--wal-method=stream".to_string(),
        format!("--max-rate={}", options.maximum_backup_rate),
        "--checkpoint=fast".to_string(),
    ];
    run_tool(&setup.pg_basebackup, &args).await
}

/// Points replication at `upstream`: `primary_conninfo` in
/// `postgresql.auto.conf` plus the `standby.signal` marker.
pub fn write_replication_configuration(
    setup: &PostgresSetup,
    upstream: &NodeAddress,
    options: &StandbyOptions,
) -> Result<(), StewardError> {
    let conninfo = format!(
        "host={} port={} user={} application_name={}",
        upstream.host, upstream.port, setup.username, options.application_name
    );
    let auto_conf = setup.pgdata.join("postgresql.auto.conf");
    let existing = match std::fs::read_to_string(&auto_conf) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let mut contents: String = existing
        .lines()
        .filter(|line| !line.trim_start().starts_with("primary_conninfo"))
        .map(|line| format!("{line}\n"))
        .collect();
    contents.push_str(&format!("primary_conninfo = '{conninfo}'\n"));
    std::fs::write(&auto_conf, contents)?;

    std::fs::write(setup.pgdata.join("standby.signal"), "")?;
    Ok(())
}

/// Drops the standby marker so the next start comes up writable.
pub fn remove_standby_signal(setup: &PostgresSetup) -> Result<(), StewardError> {
    match std::fs::remove_file(setup.pgdata.join("standby.signal")) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Replays WAL from `peer` until the local replay position reaches
/// `target`, then stops. Used by `fast_forward` to fetch WAL a failover
/// candidate is missing.
pub async fn replay_from_peer(
    controller: &PostgresController,
    peer: &NodeAddress,
    target: Lsn,
    options: &StandbyOptions,
    timeout: Duration,
) -> Result<(), StewardError> {
    write_replication_configuration(controller.setup(), peer, options)?;
    controller.start().await?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let observation = observe::observe(controller).await;
        if observation.current_lsn >= target {
            info!(
                "caught up with {} at {}",
                peer.name, observation.current_lsn
            );
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(StewardError::PgTooling(format!(
                "timed out catching up with {}: at {}, target {target}",
                peer.name, observation.current_lsn
            )));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    controller.stop(StopMode::Fast).await
}
