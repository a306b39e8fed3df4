// src/core/roles.rs

//! The closed set of node roles handed out by the monitor and tracked
//! locally by the keeper, plus the pattern type used by the transition
//! table to match "any" role.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString, FromRepr};

/// A node role. The same enumeration is used for the locally reached role
/// (`current_role`) and for monitor assignments (`assigned_role`).
///
/// The discriminants are part of the on-disk state record format and must
/// never be renumbered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    FromRepr,
)]
#[repr(u8)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The zero value: no role has been recorded yet.
    #[default]
    NoState = 0,
    Init = 1,
    Single = 2,
    WaitPrimary = 3,
    Primary = 4,
    Draining = 5,
    DemoteTimeout = 6,
    Demoted = 7,
    Catchingup = 8,
    Secondary = 9,
    PrepPromotion = 10,
    StopReplication = 11,
    WaitStandby = 12,
    Maintenance = 13,
    JoinPrimary = 14,
    ApplySettings = 15,
    PrepareMaintenance = 16,
    WaitMaintenance = 17,
    ReportLsn = 18,
    FastForward = 19,
    JoinSecondary = 20,
    Dropped = 21,
    /// Accepted on the wire for compatibility with the older failover
    /// dialect; the canonical transition table has no rows for it.
    WaitForward = 22,
}

impl Role {
    /// Roles in which this node is, or is becoming, the writable primary.
    pub fn is_primary_family(&self) -> bool {
        matches!(
            self,
            Role::Single
                | Role::Primary
                | Role::WaitPrimary
                | Role::JoinPrimary
                | Role::ApplySettings
        )
    }

    /// Roles in which this node follows (or is rejoining) a primary.
    /// `wait_maintenance` still replicates: the node keeps following
    /// until the primary has covered for its absence.
    pub fn is_standby_family(&self) -> bool {
        matches!(
            self,
            Role::WaitStandby
                | Role::Catchingup
                | Role::Secondary
                | Role::PrepPromotion
                | Role::StopReplication
                | Role::ReportLsn
                | Role::FastForward
                | Role::JoinSecondary
                | Role::WaitMaintenance
                | Role::WaitForward
        )
    }

    /// Whether the local Postgres instance is expected to be running while
    /// the node holds this role. Used by the reconcile path. `draining`
    /// is entered by stopping Postgres, so it expects stopped.
    pub fn expects_postgres_running(&self) -> bool {
        match self {
            Role::NoState | Role::Init | Role::Dropped => false,
            Role::Draining
            | Role::Demoted
            | Role::DemoteTimeout
            | Role::Maintenance
            | Role::PrepareMaintenance => false,
            role => role.is_primary_family() || role.is_standby_family(),
        }
    }
}

/// A pattern over roles, used only in transition-table rows. `Any` matches
/// every role and is never observed as an actual node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePattern {
    Any,
    Exactly(Role),
}

impl RolePattern {
    pub fn matches(&self, role: Role) -> bool {
        match self {
            RolePattern::Any => true,
            RolePattern::Exactly(expected) => *expected == role,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, RolePattern::Any)
    }
}

impl fmt::Display for RolePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolePattern::Any => write!(f, "any"),
            RolePattern::Exactly(role) => write!(f, "{role}"),
        }
    }
}
