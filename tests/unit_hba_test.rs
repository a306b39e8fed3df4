use steward::core::postgres::hba::{HbaLevel, ensure_hba_entries, hba_lines};

#[test]
fn test_skip_level_produces_nothing() {
    assert!(hba_lines(HbaLevel::Skip, "postgres", "postgres", &["db2".to_string()]).is_empty());
}

#[test]
fn test_lan_level_uses_samenet() {
    let lines = hba_lines(HbaLevel::Lan, "postgres", "replicator", &[]);
    assert_eq!(
        lines,
        vec![
            "host postgres replicator samenet trust".to_string(),
            "host replication replicator samenet trust".to_string(),
        ]
    );
}

#[test]
fn test_minimal_level_masks_addresses() {
    let hosts = vec![
        "10.0.0.12".to_string(),
        "fe80::1".to_string(),
        "db3.internal".to_string(),
    ];
    let lines = hba_lines(HbaLevel::Minimal, "postgres", "postgres", &hosts);
    assert!(lines.contains(&"host postgres postgres 10.0.0.12/32 trust".to_string()));
    assert!(lines.contains(&"host replication postgres fe80::1/128 trust".to_string()));
    assert!(lines.contains(&"host replication postgres db3.internal trust".to_string()));
    assert_eq!(lines.len(), 6);
}

#[test]
fn test_ensure_entries_appends_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("pg_hba.conf"),
        "local all all trust\n",
    )
    .unwrap();
    let hosts = vec!["10.0.0.12".to_string()];

    let changed =
        ensure_hba_entries(dir.path(), HbaLevel::Minimal, "postgres", "postgres", &hosts).unwrap();
    assert!(changed);

    let contents = std::fs::read_to_string(dir.path().join("pg_hba.conf")).unwrap();
    assert!(contents.starts_with("local all all trust\n"));
    assert!(contents.contains("host replication postgres 10.0.0.12/32 trust"));

    // A second run finds everything in place and does not touch the file.
    let changed =
        ensure_hba_entries(dir.path(), HbaLevel::Minimal, "postgres", "postgres", &hosts).unwrap();
    assert!(!changed);
    let again = std::fs::read_to_string(dir.path().join("pg_hba.conf")).unwrap();
    assert_eq!(contents, again);
}

#[test]
fn test_skip_level_never_touches_the_file() {
    let dir = tempfile::tempdir().unwrap();
    // No pg_hba.conf exists; skip must not even try to read it.
    let changed = ensure_hba_entries(
        dir.path(),
        HbaLevel::Skip,
        "postgres",
        "postgres",
        &["10.0.0.12".to_string()],
    )
    .unwrap();
    assert!(!changed);
}
