use steward::core::errors::*;
use steward::core::roles::Role;

#[test]
fn test_exit_code_contract() {
    assert_eq!(StewardError::BadArgs("x".into()).exit_code(), 10);
    assert_eq!(StewardError::BadConfig("x".into()).exit_code(), 11);
    assert_eq!(StewardError::StateMissing.exit_code(), 12);
    assert_eq!(
        StewardError::StateVersionMismatch {
            found: 9,
            supported: 2
        }
        .exit_code(),
        12
    );
    assert_eq!(
        StewardError::NoTransition {
            from: Role::Single,
            to: Role::Secondary
        }
        .exit_code(),
        12
    );
    assert_eq!(StewardError::AlreadyRunning { pid: 7 }.exit_code(), 12);
    assert_eq!(StewardError::MonitorUnreachable("x".into()).exit_code(), 20);
    assert_eq!(StewardError::RetriesExhausted("x".into()).exit_code(), 20);
    assert_eq!(StewardError::PgTooling("x".into()).exit_code(), 30);
    assert_eq!(StewardError::PgProtocol("x".into()).exit_code(), 40);
    assert_eq!(StewardError::Bug("x".into()).exit_code(), 50);
}

#[test]
fn test_loop_fatality_taxonomy() {
    // Consistency and programmer errors stop the node-active loop.
    assert!(StewardError::StateCorrupt("x".into()).is_fatal_for_loop());
    assert!(
        StewardError::SystemIdMismatch {
            on_disk: 1,
            observed: 2
        }
        .is_fatal_for_loop()
    );
    assert!(StewardError::Bug("x".into()).is_fatal_for_loop());

    // Local-DB and protocol errors end the cycle but the loop goes on.
    assert!(!StewardError::PgTooling("x".into()).is_fatal_for_loop());
    assert!(!StewardError::PgProtocol("x".into()).is_fatal_for_loop());
    assert!(
        !StewardError::NoTransition {
            from: Role::Single,
            to: Role::Secondary
        }
        .is_fatal_for_loop()
    );
    assert!(!StewardError::MonitorRejected("x".into()).is_fatal_for_loop());
}

#[test]
fn test_messages_name_the_role_pair() {
    let error = StewardError::NoTransition {
        from: Role::Catchingup,
        to: Role::Primary,
    };
    let message = error.to_string();
    assert!(message.contains("catchingup"));
    assert!(message.contains("primary"));
}
