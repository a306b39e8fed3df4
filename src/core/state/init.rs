// src/core/state/init.rs

//! The `init` record: what the data directory looked like before the
//! keeper took it over, so a restarted initialization stays idempotent.

use crate::core::errors::StewardError;
use crate::core::state::codec::{RECORD_SIZE, RecordReader, RecordWriter};
use strum_macros::{Display, FromRepr};

pub const INIT_STATE_VERSION: u32 = 1;

/// The pre-takeover condition of the local data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "snake_case")]
pub enum InitStage {
    #[default]
    Unknown = 0,
    /// The directory did not exist or was empty.
    Empty = 1,
    /// A cluster existed on disk but was not running.
    Exists = 2,
    /// A cluster existed and was running.
    Running = 3,
    /// A cluster existed and was running as a primary accepting writes.
    Primary = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitState {
    pub stage: InitStage,
}

impl InitState {
    pub fn new(stage: InitStage) -> Self {
        Self { stage }
    }

    pub fn encode(&self) -> Box<[u8; RECORD_SIZE]> {
        let mut w = RecordWriter::new();
        w.put_u32(INIT_STATE_VERSION);
        w.put_u8(self.stage as u8);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, StewardError> {
        let mut r = RecordReader::new(buf);
        let version = r.get_u32()?;
        if version != INIT_STATE_VERSION {
            return Err(StewardError::StateVersionMismatch {
                found: version,
                supported: INIT_STATE_VERSION,
            });
        }
        let byte = r.get_u8()?;
        let stage = InitStage::from_repr(byte).ok_or_else(|| {
            StewardError::StateCorrupt(format!("unknown init stage discriminant {byte}"))
        })?;
        Ok(Self { stage })
    }
}
