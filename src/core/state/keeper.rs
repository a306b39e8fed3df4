// src/core/state/keeper.rs

//! The `state` record: the keeper's locally-authoritative view of its own
//! identity, roles, and last contact with the rest of the cluster.

use crate::core::errors::StewardError;
use crate::core::roles::Role;
use crate::core::state::codec::{RECORD_SIZE, RecordReader, RecordWriter};

/// Current record format version. Version 1 stored the node id as a
/// 32-bit integer; version 2 widened it to 64 bits to match the wire.
pub const KEEPER_STATE_VERSION: u32 = 2;

/// The persisted keeper state. `assigned_role` is recorded for operator
/// visibility only; the monitor re-asserts it on every cycle and the
/// persisted copy is never treated as authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperState {
    /// Postgres server version number, e.g. 150004.
    pub pg_version: u32,
    pub pg_control_version: u32,
    pub pg_catalog_version: u32,
    pub system_identifier: u64,
    pub node_id: i64,
    pub group_id: i32,
    pub current_role: Role,
    pub assigned_role: Role,
    pub paused: bool,
    /// Epoch seconds of the last successful monitor exchange.
    pub last_monitor_contact: i64,
    /// Epoch seconds of the last successful peer (upstream) contact.
    pub last_peer_contact: i64,
    /// Replication lag in bytes; -1 means unknown.
    pub xlog_lag: i64,
}

impl Default for KeeperState {
    fn default() -> Self {
        Self {
            pg_version: 0,
            pg_control_version: 0,
            pg_catalog_version: 0,
            system_identifier: 0,
            node_id: 0,
            group_id: -1,
            current_role: Role::NoState,
            assigned_role: Role::NoState,
            paused: false,
            last_monitor_contact: 0,
            last_peer_contact: 0,
            xlog_lag: -1,
        }
    }
}

impl KeeperState {
    /// Encodes the record in the current (version 2) layout.
    pub fn encode(&self) -> Box<[u8; RECORD_SIZE]> {
        let mut w = RecordWriter::new();
        w.put_u32(KEEPER_STATE_VERSION);
        w.put_u32(self.pg_version);
        w.put_u32(self.pg_control_version);
        w.put_u32(self.pg_catalog_version);
        w.put_u64(self.system_identifier);
        w.put_i64(self.node_id);
        w.put_i32(self.group_id);
        w.put_u8(self.current_role as u8);
        w.put_u8(self.assigned_role as u8);
        w.put_u8(self.paused as u8);
        w.pad_to(40);
        w.put_i64(self.last_monitor_contact);
        w.put_i64(self.last_peer_contact);
        w.put_i64(self.xlog_lag);
        w.finish()
    }

    /// Decodes a record written by this binary or an older one. Version-1
    /// records (32-bit node id) are upgraded in memory; the next store
    /// rewrites them in the current layout.
    pub fn decode(buf: &[u8]) -> Result<Self, StewardError> {
        let mut r = RecordReader::new(buf);
        let version = r.get_u32()?;
        match version {
            1 | 2 => {}
            found => {
                return Err(StewardError::StateVersionMismatch {
                    found,
                    supported: KEEPER_STATE_VERSION,
                });
            }
        }

        let pg_version = r.get_u32()?;
        let pg_control_version = r.get_u32()?;
        let pg_catalog_version = r.get_u32()?;
        let system_identifier = r.get_u64()?;

        let (node_id, group_id) = if version == 1 {
            (r.get_i32()? as i64, r.get_i32()?)
        } else {
            (r.get_i64()?, r.get_i32()?)
        };

        let current_role = decode_role(r.get_u8()?)?;
        let assigned_role = decode_role(r.get_u8()?)?;
        let paused = r.get_u8()? != 0;

        r.skip_to(40);
        let last_monitor_contact = r.get_i64()?;
        let last_peer_contact = r.get_i64()?;
        let xlog_lag = r.get_i64()?;

        Ok(Self {
            pg_version,
            pg_control_version,
            pg_catalog_version,
            system_identifier,
            node_id,
            group_id,
            current_role,
            assigned_role,
            paused,
            last_monitor_contact,
            last_peer_contact,
            xlog_lag,
        })
    }
}

fn decode_role(byte: u8) -> Result<Role, StewardError> {
    Role::from_repr(byte)
        .ok_or_else(|| StewardError::StateCorrupt(format!("unknown role discriminant {byte}")))
}
