use steward::core::errors::StewardError;
use steward::core::roles::Role;
use steward::core::state::{
    ExpectedPostgresStatus, InitStage, InitState, KeeperState, RECORD_SIZE, StateDir,
};

fn sample_state() -> KeeperState {
    KeeperState {
        pg_version: 150004,
        pg_control_version: 1300,
        pg_catalog_version: 202307071,
        system_identifier: 7_248_261_694_614_912_345,
        node_id: 2,
        group_id: 0,
        current_role: Role::Secondary,
        assigned_role: Role::Catchingup,
        paused: false,
        last_monitor_contact: 1_722_470_400,
        last_peer_contact: 1_722_470_395,
        xlog_lag: 16384,
    }
}

#[test]
fn test_record_is_exactly_fixed_size() {
    assert_eq!(sample_state().encode().len(), RECORD_SIZE);
    assert_eq!(InitState::new(InitStage::Empty).encode().len(), RECORD_SIZE);
}

#[test]
fn test_keeper_state_round_trips() {
    let state = sample_state();
    let decoded = KeeperState::decode(&state.encode()[..]).unwrap();
    assert_eq!(decoded, state);
}

#[test]
fn test_unknown_lag_round_trips() {
    let state = KeeperState {
        xlog_lag: -1,
        ..sample_state()
    };
    let decoded = KeeperState::decode(&state.encode()[..]).unwrap();
    assert_eq!(decoded.xlog_lag, -1);
}

#[test]
fn test_version_1_records_upgrade_to_64_bit_node_id() {
    // Version 1 stored the node id as a 32-bit integer at offset 24.
    let mut buf = vec![0u8; RECORD_SIZE];
    buf[0..4].copy_from_slice(&1u32.to_le_bytes());
    buf[4..8].copy_from_slice(&130011u32.to_le_bytes());
    buf[8..12].copy_from_slice(&1201u32.to_le_bytes());
    buf[12..16].copy_from_slice(&201909212u32.to_le_bytes());
    buf[16..24].copy_from_slice(&42u64.to_le_bytes());
    buf[24..28].copy_from_slice(&7i32.to_le_bytes());
    buf[28..32].copy_from_slice(&3i32.to_le_bytes());
    buf[32] = Role::Primary as u8;
    buf[33] = Role::Primary as u8;
    buf[34] = 1;
    buf[40..48].copy_from_slice(&100i64.to_le_bytes());
    buf[48..56].copy_from_slice(&90i64.to_le_bytes());
    buf[56..64].copy_from_slice(&(-1i64).to_le_bytes());

    let decoded = KeeperState::decode(&buf).unwrap();
    assert_eq!(decoded.node_id, 7);
    assert_eq!(decoded.group_id, 3);
    assert_eq!(decoded.current_role, Role::Primary);
    assert!(decoded.paused);
    assert_eq!(decoded.xlog_lag, -1);

    // The next encode writes the current layout.
    let reencoded = KeeperState::decode(&decoded.encode()[..]).unwrap();
    assert_eq!(reencoded, decoded);
}

#[test]
fn test_future_version_is_rejected() {
    let mut buf = vec![0u8; RECORD_SIZE];
    buf[0..4].copy_from_slice(&99u32.to_le_bytes());
    match KeeperState::decode(&buf) {
        Err(StewardError::StateVersionMismatch { found: 99, .. }) => {}
        other => panic!("expected a version mismatch, got {other:?}"),
    }
}

#[test]
fn test_unknown_role_byte_is_corrupt() {
    let mut buf = sample_state().encode();
    buf[36] = 250;
    assert!(matches!(
        KeeperState::decode(&buf[..]),
        Err(StewardError::StateCorrupt(_))
    ));
}

#[test]
fn test_missing_file_maps_to_state_missing() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = StateDir::new(dir.path());
    assert!(matches!(
        state_dir.load_keeper_state(),
        Err(StewardError::StateMissing)
    ));
}

#[test]
fn test_wrong_size_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = StateDir::new(dir.path());
    std::fs::write(state_dir.state_path(), b"short").unwrap();
    assert!(matches!(
        state_dir.load_keeper_state(),
        Err(StewardError::StateCorrupt(_))
    ));
}

#[test]
fn test_store_and_load_through_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = StateDir::new(dir.path());
    let state = sample_state();

    state_dir.store_keeper_state(&state).unwrap();
    assert_eq!(state_dir.load_keeper_state().unwrap(), state);

    // Overwrite is atomic: the destination always holds a full record.
    let updated = KeeperState {
        current_role: Role::Catchingup,
        ..state
    };
    state_dir.store_keeper_state(&updated).unwrap();
    assert_eq!(state_dir.load_keeper_state().unwrap(), updated);
    assert_eq!(
        std::fs::metadata(state_dir.state_path()).unwrap().len(),
        RECORD_SIZE as u64
    );

    // No temp files are left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_init_record_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = StateDir::new(dir.path());
    for stage in [
        InitStage::Unknown,
        InitStage::Empty,
        InitStage::Exists,
        InitStage::Running,
        InitStage::Primary,
    ] {
        let init = InitState::new(stage);
        state_dir.store_init_state(&init).unwrap();
        assert_eq!(state_dir.load_init_state().unwrap(), init);
    }
    state_dir.remove_init_state().unwrap();
    assert!(matches!(
        state_dir.load_init_state(),
        Err(StewardError::StateMissing)
    ));
    // Removing twice is fine.
    state_dir.remove_init_state().unwrap();
}

#[test]
fn test_pg_status_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = StateDir::new(dir.path());
    for status in [
        ExpectedPostgresStatus::Unknown,
        ExpectedPostgresStatus::Stopped,
        ExpectedPostgresStatus::Running,
        ExpectedPostgresStatus::RunningAsSubprocess,
    ] {
        state_dir.store_pg_status(status).unwrap();
        assert_eq!(state_dir.load_pg_status().unwrap(), status);
    }
}
