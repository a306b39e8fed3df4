use steward::core::roles::{Role, RolePattern};
use strum::IntoEnumIterator;

#[test]
fn test_role_names_round_trip() {
    for role in Role::iter() {
        let text = role.to_string();
        let parsed: Role = text.parse().expect("every role name parses back");
        assert_eq!(parsed, role, "round trip failed for {text}");
    }
}

#[test]
fn test_role_wire_names() {
    assert_eq!(Role::NoState.to_string(), "no_state");
    assert_eq!(Role::WaitPrimary.to_string(), "wait_primary");
    assert_eq!(Role::Catchingup.to_string(), "catchingup");
    assert_eq!(Role::PrepPromotion.to_string(), "prep_promotion");
    assert_eq!(Role::ReportLsn.to_string(), "report_lsn");
    assert_eq!("secondary".parse::<Role>().unwrap(), Role::Secondary);
}

#[test]
fn test_role_discriminants_are_stable() {
    // On-disk encoding; renumbering would corrupt every state file.
    assert_eq!(Role::NoState as u8, 0);
    assert_eq!(Role::Init as u8, 1);
    assert_eq!(Role::Single as u8, 2);
    assert_eq!(Role::Dropped as u8, 21);
    assert_eq!(Role::from_repr(9), Some(Role::Secondary));
    assert_eq!(Role::from_repr(200), None);
}

#[test]
fn test_role_families_are_disjoint() {
    for role in Role::iter() {
        assert!(
            !(role.is_primary_family() && role.is_standby_family()),
            "{role} belongs to both families"
        );
    }
}

#[test]
fn test_default_role_is_no_state() {
    assert_eq!(Role::default(), Role::NoState);
}

#[test]
fn test_run_state_expectations() {
    assert!(Role::Single.expects_postgres_running());
    assert!(Role::Primary.expects_postgres_running());
    assert!(Role::Secondary.expects_postgres_running());
    assert!(Role::ReportLsn.expects_postgres_running());
    // Waiting for the primary to cover for maintenance still replicates;
    // reconcile must not shut the standby down while it waits.
    assert!(Role::WaitMaintenance.expects_postgres_running());
    // Draining is entered by stopping Postgres; reconcile must not
    // restart it mid-failover.
    assert!(!Role::Draining.expects_postgres_running());
    assert!(!Role::Demoted.expects_postgres_running());
    assert!(!Role::DemoteTimeout.expects_postgres_running());
    assert!(!Role::PrepareMaintenance.expects_postgres_running());
    assert!(!Role::Maintenance.expects_postgres_running());
    assert!(!Role::Dropped.expects_postgres_running());
    assert!(!Role::Init.expects_postgres_running());
}

#[test]
fn test_wait_maintenance_is_a_standby_role() {
    assert!(Role::WaitMaintenance.is_standby_family());
    assert!(!Role::WaitMaintenance.is_primary_family());
    // Draining belongs to neither family: the node is on its way out of
    // the primary role and Postgres has already been stopped.
    assert!(!Role::Draining.is_primary_family());
    assert!(!Role::Draining.is_standby_family());
}

#[test]
fn test_role_pattern_matching() {
    assert!(RolePattern::Any.matches(Role::Primary));
    assert!(RolePattern::Any.matches(Role::NoState));
    assert!(RolePattern::Exactly(Role::Primary).matches(Role::Primary));
    assert!(!RolePattern::Exactly(Role::Primary).matches(Role::Secondary));
    assert_eq!(RolePattern::Any.to_string(), "any");
    assert_eq!(RolePattern::Exactly(Role::Draining).to_string(), "draining");
}
