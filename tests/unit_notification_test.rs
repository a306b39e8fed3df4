use proptest::prelude::*;
use steward::core::monitor::notifications::StateNotification;
use steward::core::monitor::protocol::NodeHealth;
use steward::core::roles::Role;

fn sample() -> StateNotification {
    StateNotification {
        formation_id: "default".to_string(),
        group_id: 0,
        node_id: 2,
        node_name: "node_b".to_string(),
        host: "10.0.0.12".to_string(),
        port: 5432,
        reported_state: Role::Catchingup,
        goal_state: Role::Secondary,
        health: None,
    }
}

#[test]
fn test_positional_encoding_shape() {
    assert_eq!(
        sample().to_positional(),
        "S:catchingup:secondary:7.default:0:2:6.node_b:9.10.0.0.12:5432"
    );
}

#[test]
fn test_positional_round_trips() {
    let original = sample();
    let parsed = StateNotification::parse_positional(&original.to_positional()).unwrap();
    assert_eq!(parsed, original);
}

#[test]
fn test_parse_sniffs_both_encodings() {
    let positional = sample().to_positional();
    assert_eq!(StateNotification::parse(&positional).unwrap(), sample());

    let json = serde_json::to_string(&sample()).unwrap();
    assert_eq!(StateNotification::parse(&json).unwrap(), sample());
}

#[test]
fn test_json_carries_optional_health() {
    let payload = r#"{
        "formation_id": "default",
        "group_id": 0,
        "node_id": 1,
        "node_name": "node_a",
        "host": "db1",
        "port": 5432,
        "reported_state": "primary",
        "goal_state": "draining",
        "health": "good"
    }"#;
    let parsed = StateNotification::parse(payload).unwrap();
    assert_eq!(parsed.health, Some(NodeHealth::Good));
    assert_eq!(parsed.reported_state, Role::Primary);
    assert_eq!(parsed.goal_state, Role::Draining);
}

#[test]
fn test_sized_fields_may_contain_separators() {
    // Hostnames with dots and colons survive the length-prefixed form.
    let tricky = StateNotification {
        host: "fe80::1".to_string(),
        node_name: "a:b.c".to_string(),
        ..sample()
    };
    let parsed = StateNotification::parse_positional(&tricky.to_positional()).unwrap();
    assert_eq!(parsed, tricky);
}

#[test]
fn test_malformed_payloads_are_rejected() {
    for payload in [
        "",
        "X:primary:secondary:7.default:0:1:1.a:1.b:5432",
        "S:primary",
        "S:primary:nonsense_role:7.default:0:1:1.a:1.b:5432",
        "S:primary:secondary:99.default:0:1:1.a:1.b:5432",
        "S:primary:secondary:x.default:0:1:1.a:1.b:5432",
        "S:primary:secondary:7.default:zero:1:1.a:1.b:5432",
        "S:primary:secondary:7.default:0:1:1.a:1.b:port",
    ] {
        assert!(
            StateNotification::parse(payload).is_err(),
            "payload should be rejected: {payload}"
        );
    }
}

#[test]
fn test_concerns_matching() {
    let notification = sample();
    assert!(notification.concerns("default", 0, 2));
    assert!(!notification.concerns("default", 0, 3));
    assert!(!notification.concerns("other", 0, 2));
    assert!(notification.concerns_group("default", 0));
    assert!(!notification.concerns_group("default", 1));
}

proptest! {
    #[test]
    fn prop_positional_round_trips(
        formation in "[a-z0-9:. -]{0,32}",
        name in "[a-z0-9:. -]{0,32}",
        host in "[a-z0-9:. -]{0,64}",
        group_id in 0i32..64,
        node_id in 0i64..1_000_000,
        port in 1u16..,
    ) {
        let original = StateNotification {
            formation_id: formation,
            group_id,
            node_id,
            node_name: name,
            host,
            port,
            reported_state: Role::ReportLsn,
            goal_state: Role::PrepPromotion,
            health: None,
        };
        let parsed = StateNotification::parse_positional(&original.to_positional()).unwrap();
        prop_assert_eq!(parsed, original);
    }
}
