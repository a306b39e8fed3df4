// src/core/fsm/mod.rs

//! The role-transition state machine. A single static table is the
//! authoritative description of every legal move; the engine scans it
//! top to bottom and takes the first matching row.
//!
//! `any` rows match every current role and therefore sit physically last
//! in the table, so that specific rows always win.

pub mod actions;

pub use self::actions::TransitionAction;

use crate::core::errors::StewardError;
use crate::core::keeper::Keeper;
use crate::core::roles::{Role, RolePattern};
use tracing::info;

use crate::core::roles::Role::*;
use crate::core::roles::RolePattern::{Any, Exactly};
use self::actions::TransitionAction as A;

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: RolePattern,
    pub to: RolePattern,
    /// Human-readable explanation, logged whenever the row is taken.
    pub comment: &'static str,
    pub action: Option<TransitionAction>,
}

const fn row(
    from: RolePattern,
    to: RolePattern,
    comment: &'static str,
    action: Option<TransitionAction>,
) -> Transition {
    Transition {
        from,
        to,
        comment,
        action,
    }
}

/// The transition table. Scanned top to bottom, first match wins; the
/// wildcard rows are last.
pub static TRANSITIONS: &[Transition] = &[
    // --- initialization ---
    row(
        Exactly(Init),
        Exactly(Single),
        "Start as a single node",
        Some(A::InitAsSingle),
    ),
    row(
        Exactly(Init),
        Exactly(WaitStandby),
        "Start as a standby, waiting for the primary to open replication",
        None,
    ),
    row(
        Exactly(Init),
        Exactly(ReportLsn),
        "Join a running group without a primary, report the local position",
        Some(A::ReportLsn),
    ),
    // --- primary life ---
    row(
        Exactly(Single),
        Exactly(WaitPrimary),
        "A standby was added, open replication access",
        Some(A::PrepareReplication),
    ),
    row(
        Exactly(WaitPrimary),
        Exactly(Primary),
        "A standby caught up, enable synchronous replication",
        Some(A::EnableSyncRep),
    ),
    row(
        Exactly(Primary),
        Exactly(WaitPrimary),
        "Lost all standby nodes, disable synchronous replication",
        Some(A::DisableSyncRep),
    ),
    row(
        Exactly(Primary),
        Exactly(JoinPrimary),
        "A new standby is joining, open replication access",
        Some(A::PrepareReplication),
    ),
    row(
        Exactly(JoinPrimary),
        Exactly(Primary),
        "The new standby caught up, refresh synchronous replication",
        Some(A::EnableSyncRep),
    ),
    row(
        Exactly(Primary),
        Exactly(ApplySettings),
        "Replication settings changed on the monitor",
        Some(A::ApplySettings),
    ),
    row(
        Exactly(WaitPrimary),
        Exactly(ApplySettings),
        "Replication settings changed on the monitor",
        Some(A::ApplySettings),
    ),
    row(
        Exactly(JoinPrimary),
        Exactly(ApplySettings),
        "Replication settings changed on the monitor",
        Some(A::ApplySettings),
    ),
    row(
        Exactly(ApplySettings),
        Exactly(Primary),
        "Settings applied, resume normal operation",
        Some(A::EnableSyncRep),
    ),
    // --- standby life ---
    row(
        Exactly(WaitStandby),
        Exactly(Catchingup),
        "The primary is ready, build this standby from it",
        Some(A::InitStandby),
    ),
    row(
        Exactly(Catchingup),
        Exactly(Secondary),
        "Caught up with the primary",
        Some(A::EnsurePostgresRunning),
    ),
    row(
        Exactly(Secondary),
        Exactly(Catchingup),
        "Replication lost or lagging, catch up again",
        Some(A::InitStandby),
    ),
    // --- failover ---
    row(
        Exactly(Secondary),
        Exactly(ReportLsn),
        "The primary failed, report the last replayed position",
        Some(A::ReportLsn),
    ),
    row(
        Exactly(Catchingup),
        Exactly(ReportLsn),
        "The primary failed, report the last replayed position",
        Some(A::ReportLsn),
    ),
    row(
        Exactly(ReportLsn),
        Exactly(PrepPromotion),
        "Selected as the failover candidate, prepare for promotion",
        Some(A::PreparePromotion),
    ),
    row(
        Exactly(ReportLsn),
        Exactly(FastForward),
        "Fetch missing WAL from the most advanced standby",
        Some(A::FastForward),
    ),
    row(
        Exactly(FastForward),
        Exactly(PrepPromotion),
        "Missing WAL fetched, prepare for promotion",
        Some(A::PreparePromotion),
    ),
    row(
        Exactly(PrepPromotion),
        Exactly(StopReplication),
        "Stop replaying from the failed primary",
        Some(A::StopReplication),
    ),
    row(
        Exactly(PrepPromotion),
        Exactly(WaitPrimary),
        "Single candidate, promote immediately",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(StopReplication),
        Exactly(WaitPrimary),
        "Promote to primary on a new timeline",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(ReportLsn),
        Exactly(JoinSecondary),
        "Not the candidate, follow the new primary",
        Some(A::FollowNewPrimary),
    ),
    row(
        Exactly(JoinSecondary),
        Exactly(Secondary),
        "Attached to the new primary",
        Some(A::EnsurePostgresRunning),
    ),
    row(
        Exactly(ReportLsn),
        Exactly(Secondary),
        "Failover resolved without promotion, resume replication",
        Some(A::FollowNewPrimary),
    ),
    // --- demotion of a failed primary ---
    row(
        Exactly(Primary),
        Exactly(Draining),
        "The monitor is failing over, stop accepting writes",
        Some(A::StopPostgres),
    ),
    row(
        Exactly(Draining),
        Exactly(Demoted),
        "Writes drained, demotion complete",
        Some(A::StopPostgres),
    ),
    row(
        Exactly(Draining),
        Exactly(ReportLsn),
        "Back after failover, report the local position",
        Some(A::ReportLsn),
    ),
    row(
        Exactly(Primary),
        Exactly(Demoted),
        "Demoted after a network partition or failover",
        Some(A::StopPostgres),
    ),
    row(
        Exactly(Primary),
        Exactly(DemoteTimeout),
        "Demotion requested while unreachable, stop immediately",
        Some(A::StopPostgres),
    ),
    row(
        Exactly(DemoteTimeout),
        Exactly(Demoted),
        "Demotion timeout elapsed",
        None,
    ),
    row(
        Exactly(Demoted),
        Exactly(Catchingup),
        "Rejoin as a standby of the new primary",
        Some(A::InitStandby),
    ),
    row(
        Exactly(Demoted),
        Exactly(ReportLsn),
        "Back after failover, report the local position",
        Some(A::ReportLsn),
    ),
    // --- maintenance ---
    row(
        Exactly(Secondary),
        Exactly(WaitMaintenance),
        "Waiting for the primary to cover for maintenance",
        None,
    ),
    row(
        Exactly(WaitMaintenance),
        Exactly(Maintenance),
        "Enter maintenance, stop postgres",
        Some(A::StartMaintenance),
    ),
    row(
        Exactly(Primary),
        Exactly(PrepareMaintenance),
        "Demote before entering maintenance",
        Some(A::StopPostgres),
    ),
    row(
        Exactly(PrepareMaintenance),
        Exactly(Maintenance),
        "Enter maintenance, stop postgres",
        Some(A::StartMaintenance),
    ),
    row(
        Exactly(Maintenance),
        Exactly(Catchingup),
        "Leave maintenance, catch up with the primary",
        Some(A::InitStandby),
    ),
    row(
        Exactly(Maintenance),
        Exactly(Secondary),
        "Leave maintenance and resume replication",
        Some(A::EnsurePostgresRunning),
    ),
    // --- forced single: every peer was removed ---
    row(
        Exactly(Primary),
        Exactly(Single),
        "All peers removed, continue as a single node",
        Some(A::DisableReplication),
    ),
    row(
        Exactly(WaitPrimary),
        Exactly(Single),
        "All peers removed, continue as a single node",
        Some(A::DisableReplication),
    ),
    row(
        Exactly(JoinPrimary),
        Exactly(Single),
        "All peers removed, continue as a single node",
        Some(A::DisableReplication),
    ),
    row(
        Exactly(ApplySettings),
        Exactly(Single),
        "All peers removed, continue as a single node",
        Some(A::DisableReplication),
    ),
    row(
        Exactly(Secondary),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(Catchingup),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(WaitStandby),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(ReportLsn),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(PrepPromotion),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(StopReplication),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(FastForward),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(JoinSecondary),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    row(
        Exactly(Demoted),
        Exactly(Single),
        "All peers removed, promote and continue as a single node",
        Some(A::PromoteStandby),
    ),
    // --- wildcard rows, last by construction ---
    row(
        Any,
        Exactly(Dropped),
        "This node is being removed from the formation",
        Some(A::DropNode),
    ),
];

/// First matching row for the pair, or `None` when the move is illegal.
pub fn find_transition(current: Role, assigned: Role) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from.matches(current) && t.to.matches(assigned))
}

/// Drives the keeper through one transition toward its assigned role.
/// On success `current_role` becomes the assigned role; on failure it is
/// left unchanged and the next cycle retries.
pub async fn reach_assigned_state(keeper: &mut Keeper) -> Result<(), StewardError> {
    let current = keeper.state.current_role;
    let assigned = keeper.state.assigned_role;
    let transition = find_transition(current, assigned).ok_or(StewardError::NoTransition {
        from: current,
        to: assigned,
    })?;

    // Wildcard rows log without the `from` label.
    if transition.from.is_any() {
        info!("transition to \"{assigned}\": {}", transition.comment);
    } else {
        info!(
            "transition from \"{current}\" to \"{assigned}\": {}",
            transition.comment
        );
    }

    if let Some(action) = transition.action {
        keeper.run_action(action).await?;
    }
    keeper.state.current_role = assigned;
    Ok(())
}

/// The "ensure current state" branch: when assigned equals current the
/// table is not consulted; the database run-state is reconciled to what
/// the role implies without changing the role.
pub async fn reconcile(keeper: &mut Keeper) -> Result<(), StewardError> {
    let role = keeper.state.current_role;
    if role.expects_postgres_running() {
        keeper.ensure_postgres_running().await
    } else if role == Role::NoState || role == Role::Init {
        Ok(())
    } else {
        keeper.ensure_postgres_stopped().await
    }
}
