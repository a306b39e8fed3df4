// src/core/errors.rs

//! Defines the primary error type for the keeper and the process exit
//! codes the supervisor uses to classify child failures.

use crate::core::roles::Role;
use thiserror::Error;

// Exit codes, consumed by the supervisor when a service stops.
pub const EXIT_CODE_QUIT: i32 = 0;
pub const EXIT_CODE_BAD_ARGS: i32 = 10;
pub const EXIT_CODE_BAD_CONFIG: i32 = 11;
pub const EXIT_CODE_BAD_STATE: i32 = 12;
pub const EXIT_CODE_MONITOR: i32 = 20;
pub const EXIT_CODE_PG_CTL: i32 = 30;
pub const EXIT_CODE_PG_SQL: i32 = 40;
pub const EXIT_CODE_INTERNAL_ERROR: i32 = 50;

/// The main error enum, representing all failure classes of the keeper.
///
/// Variants group into the taxonomy the node-active loop relies on:
/// transient errors are retried, consistency and programmer errors stop
/// the loop, local-DB and protocol errors end the current cycle without
/// advancing the role.
#[derive(Error, Debug)]
pub enum StewardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid arguments: {0}")]
    BadArgs(String),

    #[error("configuration error: {0}")]
    BadConfig(String),

    // --- Persistent state (consistency) errors ---
    #[error("state file does not exist")]
    StateMissing,

    #[error("state file is corrupt: {0}")]
    StateCorrupt(String),

    #[error("state file version {found} is newer than this binary supports ({supported})")]
    StateVersionMismatch { found: u32, supported: u32 },

    #[error(
        "system identifier mismatch: state file has {on_disk}, local cluster reports {observed}"
    )]
    SystemIdMismatch { on_disk: u64, observed: u64 },

    #[error("another keeper (pid {pid}) already owns this data directory")]
    AlreadyRunning { pid: i32 },

    #[error("no transition found from \"{from}\" to \"{to}\"")]
    NoTransition { from: Role, to: Role },

    // --- Monitor errors ---
    #[error("monitor is unreachable: {0}")]
    MonitorUnreachable(String),

    #[error("monitor rejected the call: {0}")]
    MonitorRejected(String),

    #[error("monitor returned an unexpected result: {0}")]
    MonitorProtocol(String),

    #[error("monitor extension version mismatch: installed {installed}, expected {expected}")]
    ExtensionMismatch { installed: String, expected: String },

    #[error("retries exhausted while {0}")]
    RetriesExhausted(String),

    // --- Local database errors ---
    #[error("postgres tooling failed: {0}")]
    PgTooling(String),

    #[error("postgres query failed: {0}")]
    PgProtocol(String),

    // --- Programmer errors ---
    #[error("BUG: {0}")]
    Bug(String),
}

impl StewardError {
    /// Maps the error to the exit code contract of the supervisor.
    pub fn exit_code(&self) -> i32 {
        match self {
            StewardError::BadArgs(_) => EXIT_CODE_BAD_ARGS,
            StewardError::BadConfig(_) => EXIT_CODE_BAD_CONFIG,
            StewardError::Io(_)
            | StewardError::StateMissing
            | StewardError::StateCorrupt(_)
            | StewardError::StateVersionMismatch { .. }
            | StewardError::SystemIdMismatch { .. }
            | StewardError::AlreadyRunning { .. }
            | StewardError::NoTransition { .. } => EXIT_CODE_BAD_STATE,
            StewardError::MonitorUnreachable(_)
            | StewardError::MonitorRejected(_)
            | StewardError::MonitorProtocol(_)
            | StewardError::ExtensionMismatch { .. }
            | StewardError::RetriesExhausted(_) => EXIT_CODE_MONITOR,
            StewardError::PgTooling(_) => EXIT_CODE_PG_CTL,
            StewardError::PgProtocol(_) => EXIT_CODE_PG_SQL,
            StewardError::Bug(_) => EXIT_CODE_INTERNAL_ERROR,
        }
    }

    /// Whether the node-active loop must stop on this error. Local-DB and
    /// protocol failures end the cycle but the loop keeps running;
    /// consistency and programmer errors do not.
    pub fn is_fatal_for_loop(&self) -> bool {
        matches!(
            self,
            StewardError::StateCorrupt(_)
                | StewardError::StateVersionMismatch { .. }
                | StewardError::SystemIdMismatch { .. }
                | StewardError::ExtensionMismatch { .. }
                | StewardError::Bug(_)
        )
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(e: serde_json::Error) -> Self {
        StewardError::MonitorProtocol(format!("JSON decode error: {e}"))
    }
}
