// src/core/state/pg.rs

//! The `pg` record: the run-state the Postgres controller should drive
//! the local instance toward. Written by the node-active loop, read by
//! the controller service.

use crate::core::errors::StewardError;
use crate::core::state::codec::{RECORD_SIZE, RecordReader, RecordWriter};
use strum_macros::{Display, FromRepr};

pub const PG_STATUS_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "snake_case")]
pub enum ExpectedPostgresStatus {
    #[default]
    Unknown = 0,
    Stopped = 1,
    Running = 2,
    /// Running under the controller's direct supervision rather than as a
    /// detached daemon.
    RunningAsSubprocess = 3,
}

impl ExpectedPostgresStatus {
    pub fn expects_running(&self) -> bool {
        matches!(
            self,
            ExpectedPostgresStatus::Running | ExpectedPostgresStatus::RunningAsSubprocess
        )
    }
}

pub fn encode(status: ExpectedPostgresStatus) -> Box<[u8; RECORD_SIZE]> {
    let mut w = RecordWriter::new();
    w.put_u32(PG_STATUS_VERSION);
    w.put_u8(status as u8);
    w.finish()
}

pub fn decode(buf: &[u8]) -> Result<ExpectedPostgresStatus, StewardError> {
    let mut r = RecordReader::new(buf);
    let version = r.get_u32()?;
    if version != PG_STATUS_VERSION {
        return Err(StewardError::StateVersionMismatch {
            found: version,
            supported: PG_STATUS_VERSION,
        });
    }
    let byte = r.get_u8()?;
    ExpectedPostgresStatus::from_repr(byte).ok_or_else(|| {
        StewardError::StateCorrupt(format!("unknown postgres status discriminant {byte}"))
    })
}
