use steward::core::fsm::{TRANSITIONS, find_transition};
use steward::core::roles::{Role, RolePattern};
use strum::IntoEnumIterator;

/// Every (current, assigned) pair the monitor actually produces. This is
/// the coverage contract: each pair must hit exactly one row, found by
/// the first-match scan.
const REACHABLE_PAIRS: &[(Role, Role)] = &[
    // initialization
    (Role::Init, Role::Single),
    (Role::Init, Role::WaitStandby),
    (Role::Init, Role::ReportLsn),
    // primary life
    (Role::Single, Role::WaitPrimary),
    (Role::WaitPrimary, Role::Primary),
    (Role::Primary, Role::WaitPrimary),
    (Role::Primary, Role::JoinPrimary),
    (Role::JoinPrimary, Role::Primary),
    (Role::Primary, Role::ApplySettings),
    (Role::WaitPrimary, Role::ApplySettings),
    (Role::JoinPrimary, Role::ApplySettings),
    (Role::ApplySettings, Role::Primary),
    // standby life
    (Role::WaitStandby, Role::Catchingup),
    (Role::Catchingup, Role::Secondary),
    (Role::Secondary, Role::Catchingup),
    // failover
    (Role::Secondary, Role::ReportLsn),
    (Role::Catchingup, Role::ReportLsn),
    (Role::ReportLsn, Role::PrepPromotion),
    (Role::ReportLsn, Role::FastForward),
    (Role::FastForward, Role::PrepPromotion),
    (Role::PrepPromotion, Role::StopReplication),
    (Role::PrepPromotion, Role::WaitPrimary),
    (Role::StopReplication, Role::WaitPrimary),
    (Role::ReportLsn, Role::JoinSecondary),
    (Role::JoinSecondary, Role::Secondary),
    (Role::ReportLsn, Role::Secondary),
    // demotion
    (Role::Primary, Role::Draining),
    (Role::Draining, Role::Demoted),
    (Role::Draining, Role::ReportLsn),
    (Role::Primary, Role::Demoted),
    (Role::Primary, Role::DemoteTimeout),
    (Role::DemoteTimeout, Role::Demoted),
    (Role::Demoted, Role::Catchingup),
    (Role::Demoted, Role::ReportLsn),
    // maintenance
    (Role::Secondary, Role::WaitMaintenance),
    (Role::WaitMaintenance, Role::Maintenance),
    (Role::Primary, Role::PrepareMaintenance),
    (Role::PrepareMaintenance, Role::Maintenance),
    (Role::Maintenance, Role::Catchingup),
    (Role::Maintenance, Role::Secondary),
    // forced single
    (Role::Primary, Role::Single),
    (Role::WaitPrimary, Role::Single),
    (Role::JoinPrimary, Role::Single),
    (Role::ApplySettings, Role::Single),
    (Role::Secondary, Role::Single),
    (Role::Catchingup, Role::Single),
    (Role::WaitStandby, Role::Single),
    (Role::ReportLsn, Role::Single),
    (Role::PrepPromotion, Role::Single),
    (Role::StopReplication, Role::Single),
    (Role::FastForward, Role::Single),
    (Role::JoinSecondary, Role::Single),
    (Role::Demoted, Role::Single),
];

#[test]
fn test_every_reachable_pair_has_a_row() {
    for &(current, assigned) in REACHABLE_PAIRS {
        assert!(
            find_transition(current, assigned).is_some(),
            "no transition from \"{current}\" to \"{assigned}\""
        );
    }
}

#[test]
fn test_first_match_is_deterministic() {
    // The first matching row is the row: no earlier row may also match.
    for &(current, assigned) in REACHABLE_PAIRS {
        let matches: Vec<usize> = TRANSITIONS
            .iter()
            .enumerate()
            .filter(|(_, t)| t.from.matches(current) && t.to.matches(assigned))
            .map(|(i, _)| i)
            .collect();
        let first = find_transition(current, assigned).unwrap();
        let table_first = &TRANSITIONS[matches[0]];
        assert_eq!(first.comment, table_first.comment);
    }
}

#[test]
fn test_wildcard_rows_are_physically_last() {
    let first_any = TRANSITIONS.iter().position(|t| t.from.is_any());
    if let Some(first_any) = first_any {
        for (index, transition) in TRANSITIONS.iter().enumerate().skip(first_any) {
            assert!(
                transition.from.is_any(),
                "specific row at index {index} appears after a wildcard row"
            );
        }
    }
}

#[test]
fn test_every_role_can_be_dropped() {
    // The wildcard drop row covers every state a node can be in.
    for role in Role::iter() {
        let transition = find_transition(role, Role::Dropped)
            .unwrap_or_else(|| panic!("no drop transition from \"{role}\""));
        assert!(transition.action.is_some());
    }
}

#[test]
fn test_unreachable_pairs_have_no_row() {
    // The monitor never assigns these; the keeper must refuse them and
    // keep its current role rather than invent behavior.
    for (current, assigned) in [
        (Role::Single, Role::Secondary),
        (Role::Primary, Role::Catchingup),
        (Role::Secondary, Role::Primary),
        (Role::Maintenance, Role::Primary),
        (Role::Dropped, Role::Single),
        (Role::Secondary, Role::WaitForward),
    ] {
        assert!(
            find_transition(current, assigned).is_none(),
            "unexpected transition from \"{current}\" to \"{assigned}\""
        );
    }
}

#[test]
fn test_rows_carry_comments() {
    for transition in TRANSITIONS {
        assert!(
            !transition.comment.is_empty(),
            "transition {} -> {} has no comment",
            transition.from,
            transition.to
        );
    }
}

#[test]
fn test_no_row_targets_a_wildcard() {
    // `any` only ever appears on the matching side.
    for transition in TRANSITIONS {
        assert!(
            !matches!(transition.to, RolePattern::Any),
            "row {} -> any is not a legal target",
            transition.from
        );
    }
}
