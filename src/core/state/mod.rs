// src/core/state/mod.rs

//! On-disk keeper state: three fixed-size, versioned records kept in the
//! keeper's state directory and replaced atomically on every write.
//!
//! - `state` — the keeper's locally-authoritative state (`KeeperState`)
//! - `init`  — the pre-takeover condition of the data directory
//! - `pg`    — the run-state the Postgres controller should enforce

pub mod codec;
pub mod init;
pub mod keeper;
pub mod pg;

pub use codec::RECORD_SIZE;
pub use init::{InitStage, InitState};
pub use keeper::{KEEPER_STATE_VERSION, KeeperState};
pub use pg::ExpectedPostgresStatus;

use crate::core::errors::StewardError;
use std::path::{Path, PathBuf};

/// The keeper's state directory, owning the three record files.
#[derive(Debug, Clone)]
pub struct StateDir {
    dir: PathBuf,
}

impl StateDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the directory if needed.
    pub fn ensure_exists(&self) -> Result<(), StewardError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state")
    }

    pub fn init_path(&self) -> PathBuf {
        self.dir.join("init")
    }

    pub fn pg_path(&self) -> PathBuf {
        self.dir.join("pg")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join("steward.pid")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_keeper_state(&self) -> Result<KeeperState, StewardError> {
        let buf = codec::read_record_file(&self.state_path())?;
        KeeperState::decode(&buf)
    }

    pub fn store_keeper_state(&self, state: &KeeperState) -> Result<(), StewardError> {
        codec::write_record_file(&self.state_path(), &state.encode())
    }

    pub fn load_init_state(&self) -> Result<InitState, StewardError> {
        let buf = codec::read_record_file(&self.init_path())?;
        InitState::decode(&buf)
    }

    pub fn store_init_state(&self, state: &InitState) -> Result<(), StewardError> {
        codec::write_record_file(&self.init_path(), &state.encode())
    }

    pub fn load_pg_status(&self) -> Result<ExpectedPostgresStatus, StewardError> {
        let buf = codec::read_record_file(&self.pg_path())?;
        pg::decode(&buf)
    }

    pub fn store_pg_status(&self, status: ExpectedPostgresStatus) -> Result<(), StewardError> {
        codec::write_record_file(&self.pg_path(), &pg::encode(status))
    }

    /// Removes the `init` marker once initialization has fully completed.
    pub fn remove_init_state(&self) -> Result<(), StewardError> {
        match std::fs::remove_file(self.init_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
