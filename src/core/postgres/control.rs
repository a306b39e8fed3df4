// src/core/postgres/control.rs

//! Run-state control of the local Postgres instance through `pg_ctl`.

use crate::core::errors::StewardError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How hard to stop the instance. Mirrors `pg_ctl`'s shutdown modes; the
/// graduated shutdown path walks from `Smart` to `Immediate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Wait for sessions to disconnect.
    Smart,
    /// Disconnect sessions, shut down cleanly.
    Fast,
    /// Abort without a clean checkpoint; recovery runs on next start.
    Immediate,
}

impl StopMode {
    fn pg_ctl_mode(&self) -> &'static str {
        match self {
            StopMode::Smart => "smart",
            StopMode::Fast => "fast",
            StopMode::Immediate => "immediate",
        }
    }
}

/// Everything needed to find and talk to the local installation.
#[derive(Debug, Clone)]
pub struct PostgresSetup {
    pub pgdata: PathBuf,
    pub pg_ctl: PathBuf,
    pub pg_basebackup: PathBuf,
    pub pg_rewind: PathBuf,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
}

impl PostgresSetup {
    /// Connection string for local introspection queries.
    pub fn local_connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} connect_timeout=2",
            self.host, self.port, self.dbname, self.username
        )
    }

    pub fn postmaster_pid_path(&self) -> PathBuf {
        self.pgdata.join("postmaster.pid")
    }
}

/// Start/stop controller for one data directory.
#[derive(Debug, Clone)]
pub struct PostgresController {
    setup: PostgresSetup,
    start_timeout: Duration,
}

impl PostgresController {
    pub fn new(setup: PostgresSetup, start_timeout: Duration) -> Self {
        Self {
            setup,
            start_timeout,
        }
    }

    pub fn setup(&self) -> &PostgresSetup {
        &self.setup
    }

    /// The postmaster PID from `postmaster.pid`, if the file exists and
    /// parses.
    pub fn postmaster_pid(&self) -> Option<i32> {
        let content = std::fs::read_to_string(self.setup.postmaster_pid_path()).ok()?;
        content.lines().next()?.trim().parse().ok()
    }

    /// Whether a postmaster is alive for this data directory. A stale
    /// `postmaster.pid` left by a crash does not count as running.
    pub fn is_running(&self) -> bool {
        match self.postmaster_pid() {
            // Signal 0 probes for existence without touching the process.
            Some(pid) => unsafe { libc::kill(pid, 0) == 0 },
            None => false,
        }
    }

    pub fn data_directory_exists(&self) -> bool {
        self.setup.pgdata.join("PG_VERSION").exists()
    }

    pub fn data_directory_is_empty(&self) -> bool {
        match std::fs::read_dir(&self.setup.pgdata) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    /// Creates a new cluster in the data directory.
    pub async fn initdb(&self) -> Result<(), StewardError> {
        if self.data_directory_exists() {
            debug!("data directory already initialized, skipping initdb");
            return Ok(());
        }
        info!("initializing cluster at {}", self.setup.pgdata.display());
        self.run_pg_ctl(&["initdb", "-s", "-o", "--auth=trust --encoding=UTF8"])
            .await
    }

    pub async fn start(&self) -> Result<(), StewardError> {
        if self.is_running() {
            debug!("postgres is already running");
            return Ok(());
        }
        info!("starting postgres at {}", self.setup.pgdata.display());
        let timeout = format!("{}", self.start_timeout.as_secs().max(1));
        self.run_pg_ctl(&["start", "-w", "-t", &timeout, "-l", "startup.log"])
            .await
    }

    pub async fn stop(&self, mode: StopMode) -> Result<(), StewardError> {
        if !self.is_running() {
            debug!("postgres is already stopped");
            return Ok(());
        }
        info!("stopping postgres (mode: {})", mode.pg_ctl_mode());
        self.run_pg_ctl(&["stop", "-w", "-m", mode.pg_ctl_mode()])
            .await
    }

    pub async fn reload(&self) -> Result<(), StewardError> {
        if !self.is_running() {
            warn!("reload requested but postgres is not running");
            return Ok(());
        }
        self.run_pg_ctl(&["reload"]).await
    }

    pub async fn restart(&self) -> Result<(), StewardError> {
        self.stop(StopMode::Fast).await?;
        self.start().await
    }

    /// Promotes a standby to accept writes on a new timeline. `pg_ctl`
    /// waits until the promotion has completed.
    pub async fn promote(&self) -> Result<(), StewardError> {
        info!("promoting postgres at {}", self.setup.pgdata.display());
        self.run_pg_ctl(&["promote", "-w"]).await
    }

    async fn run_pg_ctl(&self, args: &[&str]) -> Result<(), StewardError> {
        let output = Command::new(&self.setup.pg_ctl)
            .arg("-D")
            .arg(&self.setup.pgdata)
            .args(args)
            .env("PGPORT", self.setup.port.to_string())
            .output()
            .await
            .map_err(|e| {
                StewardError::PgTooling(format!(
                    "failed to run {}: {e}",
                    self.setup.pg_ctl.display()
                ))
            })?;
        if !output.status.success() {
            return Err(StewardError::PgTooling(format!(
                "pg_ctl {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Runs an external tool, mapping a nonzero exit into `PgTooling` with
/// the tool's stderr attached.
pub(crate) async fn run_tool(program: &Path, args: &[String]) -> Result<(), StewardError> {
    debug!("running {} {}", program.display(), args.join(" "));
    let output = Command::new(program).args(args).output().await.map_err(|e| {
        StewardError::PgTooling(format!("failed to run {}: {e}", program.display()))
    })?;
    if !output.status.success() {
        return Err(StewardError::PgTooling(format!(
            "{} failed: {}",
            program.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
