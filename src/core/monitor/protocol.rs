// src/core/monitor/protocol.rs

//! Typed views over the tuples returned by the monitor's SQL functions.

use crate::core::errors::StewardError;
use crate::core::lsn::Lsn;
use crate::core::roles::Role;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, FromRepr};
use tokio_postgres::Row;

/// Upper bound on nodes tracked per group; collections returned by the
/// monitor are truncated to this many entries.
pub const MAX_NODES_PER_GROUP: usize = 12;

/// Maximum node name length accepted from the monitor.
pub const MAX_NODE_NAME_LEN: usize = 64;

/// Health of a node as recorded by the monitor.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    FromRepr,
)]
#[repr(i32)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    #[default]
    Unknown = 0,
    Bad = 1,
    Good = 2,
}

/// The monitor's answer to `register_node` and `node_active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedState {
    pub node_id: i64,
    pub group_id: i32,
    pub assigned_role: Role,
    /// 0..100; zero excludes the node from failover candidate selection.
    pub candidate_priority: i32,
    /// Whether this node participates in synchronous acknowledgement.
    pub replication_quorum: bool,
}

impl AssignedState {
    pub fn from_row(row: &Row) -> Result<Self, StewardError> {
        let role_text: String = try_get(row, "assigned_group_state")?;
        Ok(Self {
            node_id: try_get(row, "assigned_node_id")?,
            group_id: try_get(row, "assigned_group_id")?,
            assigned_role: parse_role(&role_text)?,
            candidate_priority: try_get(row, "candidate_priority")?,
            replication_quorum: try_get(row, "replication_quorum")?,
        })
    }
}

/// Address and replication standing of a peer node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub node_id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Last replay position the monitor knows about for this node.
    pub lsn: Lsn,
    pub is_primary: bool,
    pub health: NodeHealth,
    pub timeline: i32,
}

impl NodeAddress {
    pub fn from_row(row: &Row) -> Result<Self, StewardError> {
        let lsn_text: String = try_get(row, "node_lsn")?;
        let lsn = if lsn_text.is_empty() {
            Lsn::INVALID
        } else {
            lsn_text
                .parse()
                .map_err(|e: String| StewardError::MonitorProtocol(e))?
        };
        let port: i32 = try_get(row, "node_port")?;
        let health_code: i32 = try_get(row, "node_health")?;
        let mut name: String = try_get(row, "node_name")?;
        name.truncate(MAX_NODE_NAME_LEN);
        Ok(Self {
            node_id: try_get(row, "node_id")?,
            name,
            host: try_get(row, "node_host")?,
            port: u16::try_from(port).map_err(|_| {
                StewardError::MonitorProtocol(format!("node port {port} out of range"))
            })?,
            lsn,
            is_primary: try_get(row, "node_is_primary")?,
            health: NodeHealth::from_repr(health_code).unwrap_or_default(),
            timeline: try_get(row, "node_timeline")?,
        })
    }

    pub fn connection_string(&self, dbname: &str) -> String {
        format!(
            "host={} port={} dbname={} connect_timeout=2",
            self.host, self.port, dbname
        )
    }
}

pub fn parse_role(text: &str) -> Result<Role, StewardError> {
    text.parse::<Role>()
        .map_err(|_| StewardError::MonitorProtocol(format!("unknown role \"{text}\"")))
}

fn try_get<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    column: &str,
) -> Result<T, StewardError> {
    row.try_get(column)
        .map_err(|e| StewardError::MonitorProtocol(format!("bad column \"{column}\": {e}")))
}
