// src/config.rs

//! Keeper configuration: loading from TOML, environment overrides, and
//! validation. The parsed value is immutable after startup; SIGHUP
//! rebuilds a fresh value and republishes it atomically.

use crate::core::errors::StewardError;
use crate::core::postgres::control::PostgresSetup;
use crate::core::postgres::hba::HbaLevel;
use crate::core::postgres::standby::StandbyOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// Environment variables consumed by the keeper.
pub const ENV_MONITOR: &str = "STEWARD_MONITOR";
pub const ENV_NODE_NAME: &str = "STEWARD_NODE_NAME";
pub const ENV_CANDIDATE_PRIORITY: &str = "STEWARD_CANDIDATE_PRIORITY";
pub const ENV_REPLICATION_QUORUM: &str = "STEWARD_REPLICATION_QUORUM";
pub const ENV_DEBUG: &str = "STEWARD_DEBUG";
pub const ENV_PGDATA: &str = "PGDATA";

/// The local Postgres installation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostgresqlConfig {
    /// The managed data directory. Falls back to `$PGDATA`.
    #[serde(default)]
    pub pgdata: PathBuf,
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_dbname")]
    pub dbname: String,
    #[serde(default = "default_pg_username")]
    pub username: String,
    /// Directory holding `pg_ctl` and friends; resolved from `$PATH`
    /// when absent.
    #[serde(default)]
    pub bindir: Option<PathBuf>,
}

impl Default for PostgresqlConfig {
    fn default() -> Self {
        Self {
            pgdata: PathBuf::new(),
            host: default_pg_host(),
            port: default_pg_port(),
            dbname: default_pg_dbname(),
            username: default_pg_username(),
            bindir: None,
        }
    }
}

fn default_pg_host() -> String {
    "localhost".to_string()
}
fn default_pg_port() -> u16 {
    5432
}
fn default_pg_dbname() -> String {
    "postgres".to_string()
}
fn default_pg_username() -> String {
    "postgres".to_string()
}

/// Replication behavior of this node.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    /// 0..100; zero keeps this node out of failover candidate selection.
    #[serde(default = "default_candidate_priority")]
    pub candidate_priority: i32,
    /// Whether this node takes part in synchronous acknowledgement.
    #[serde(default = "default_replication_quorum")]
    pub replication_quorum: bool,
    /// `pg_basebackup --max-rate` ceiling.
    #[serde(default = "default_maximum_backup_rate")]
    pub maximum_backup_rate: String,
    /// Operator override: allow re-seeding a non-empty data directory.
    #[serde(default)]
    pub allow_nonempty_directory: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            candidate_priority: default_candidate_priority(),
            replication_quorum: default_replication_quorum(),
            maximum_backup_rate: default_maximum_backup_rate(),
            allow_nonempty_directory: false,
        }
    }
}

fn default_candidate_priority() -> i32 {
    50
}
fn default_replication_quorum() -> bool {
    true
}
fn default_maximum_backup_rate() -> String {
    "100M".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HbaConfig {
    #[serde(default)]
    pub level: HbaLevel,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SslConfig {
    /// Generate a self-signed server certificate at primary init.
    #[serde(default)]
    pub self_signed: bool,
}

/// All time-based knobs, as humantime strings in the file ("5s", "2m").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeoutConfig {
    /// Node-active cycle period.
    #[serde(with = "humantime_serde", default = "default_cycle_time")]
    pub cycle_time: Duration,
    /// How long `pg_ctl start -w` may take.
    #[serde(with = "humantime_serde", default = "default_postgres_start")]
    pub postgres_start: Duration,
    /// How long a promotion may take to accept writes.
    #[serde(with = "humantime_serde", default = "default_promotion")]
    pub promotion: Duration,
    /// Budget for fetching missing WAL during `fast_forward`.
    #[serde(with = "humantime_serde", default = "default_fast_forward")]
    pub fast_forward: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cycle_time: default_cycle_time(),
            postgres_start: default_postgres_start(),
            promotion: default_promotion(),
            fast_forward: default_fast_forward(),
        }
    }
}

fn default_cycle_time() -> Duration {
    Duration::from_secs(5)
}
fn default_postgres_start() -> Duration {
    Duration::from_secs(30)
}
fn default_promotion() -> Duration {
    Duration::from_secs(30)
}
fn default_fast_forward() -> Duration {
    Duration::from_secs(300)
}

/// The whole keeper configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_formation")]
    pub formation: String,
    /// Desired group; the monitor assigns one when absent.
    #[serde(default)]
    pub group: Option<i32>,
    /// Stable node name; the monitor picks one when absent.
    #[serde(default)]
    pub node_name: Option<String>,
    /// The hostname peers and the monitor reach this node at.
    pub hostname: String,
    /// Monitor connection URI.
    #[serde(default)]
    pub monitor: String,
    #[serde(default = "default_state_directory")]
    pub state_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub postgresql: PostgresqlConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub hba: HbaConfig,
    #[serde(default)]
    pub ssl: SslConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Where this value was loaded from; used by the SIGHUP reload.
    #[serde(skip)]
    source_path: PathBuf,
}

fn default_formation() -> String {
    "default".to_string()
}
fn default_state_directory() -> PathBuf {
    PathBuf::from("/var/lib/steward")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads, applies environment overrides, and validates.
    pub fn from_file(path: &Path) -> Result<Self, StewardError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StewardError::BadConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|e| {
            StewardError::BadConfig(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.source_path = path.to_path_buf();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    fn apply_env_overrides(&mut self) -> Result<(), StewardError> {
        if let Ok(monitor) = std::env::var(ENV_MONITOR) {
            self.monitor = monitor;
        }
        if let Ok(name) = std::env::var(ENV_NODE_NAME) {
            self.node_name = Some(name);
        }
        if let Ok(priority) = std::env::var(ENV_CANDIDATE_PRIORITY) {
            self.replication.candidate_priority = priority.parse().map_err(|_| {
                StewardError::BadConfig(format!(
                    "{ENV_CANDIDATE_PRIORITY} must be an integer, got \"{priority}\""
                ))
            })?;
        }
        if let Ok(quorum) = std::env::var(ENV_REPLICATION_QUORUM) {
            self.replication.replication_quorum = quorum.parse().map_err(|_| {
                StewardError::BadConfig(format!(
                    "{ENV_REPLICATION_QUORUM} must be true or false, got \"{quorum}\""
                ))
            })?;
        }
        if std::env::var(ENV_DEBUG).is_ok() {
            self.log_level = "debug".to_string();
        }
        if self.postgresql.pgdata.as_os_str().is_empty()
            && let Ok(pgdata) = std::env::var(ENV_PGDATA)
        {
            self.postgresql.pgdata = PathBuf::from(pgdata);
        }
        Ok(())
    }

    /// Validates the resolved configuration for logical consistency.
    pub fn validate(&self) -> Result<(), StewardError> {
        if self.formation.trim().is_empty() {
            return Err(StewardError::BadConfig("formation cannot be empty".into()));
        }
        if self.hostname.trim().is_empty() {
            return Err(StewardError::BadConfig("hostname cannot be empty".into()));
        }
        if self.monitor.trim().is_empty() {
            return Err(StewardError::BadConfig(format!(
                "no monitor URI: set `monitor` in the file or {ENV_MONITOR}"
            )));
        }
        url::Url::parse(&self.monitor).map_err(|e| {
            StewardError::BadConfig(format!("invalid monitor URI \"{}\": {e}", self.monitor))
        })?;
        if self.postgresql.pgdata.as_os_str().is_empty() {
            return Err(StewardError::BadConfig(format!(
                "no data directory: set `postgresql.pgdata` in the file or {ENV_PGDATA}"
            )));
        }
        if self.postgresql.port == 0 {
            return Err(StewardError::BadConfig("postgresql.port cannot be 0".into()));
        }
        if !(0..=100).contains(&self.replication.candidate_priority) {
            return Err(StewardError::BadConfig(format!(
                "replication.candidate_priority must be within 0..100, got {}",
                self.replication.candidate_priority
            )));
        }
        if self.timeouts.cycle_time.is_zero() {
            return Err(StewardError::BadConfig(
                "timeouts.cycle_time cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// The resolved paths and addresses of the local installation.
    pub fn postgres_setup(&self) -> PostgresSetup {
        let tool = |name: &str| -> PathBuf {
            match &self.postgresql.bindir {
                Some(bindir) => bindir.join(name),
                None => PathBuf::from(name),
            }
        };
        PostgresSetup {
            pgdata: self.postgresql.pgdata.clone(),
            pg_ctl: tool("pg_ctl"),
            pg_basebackup: tool("pg_basebackup"),
            pg_rewind: tool("pg_rewind"),
            host: self.postgresql.host.clone(),
            port: self.postgresql.port,
            dbname: self.postgresql.dbname.clone(),
            username: self.postgresql.username.clone(),
        }
    }

    /// Options for standby provisioning. The application name must be
    /// stable per node: it is what the monitor puts into
    /// `synchronous_standby_names` on the primary.
    pub fn standby_options(&self, node_id: i64) -> StandbyOptions {
        StandbyOptions {
            maximum_backup_rate: self.replication.maximum_backup_rate.clone(),
            allow_nonempty_directory: self.replication.allow_nonempty_directory,
            application_name: self
                .node_name
                .clone()
                .unwrap_or_else(|| format!("steward_{node_id}")),
        }
    }
}
