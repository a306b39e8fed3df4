//! Environment overrides are process-global, so they get a test binary
//! of their own.

use std::io::Write;
use steward::config::Config;

#[test]
fn test_environment_overrides_win() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"
hostname = "db1"
monitor = "postgres://steward@file-monitor/steward"
"#,
    )
    .unwrap();
    file.flush().unwrap();

    // SAFETY: this test binary is single-threaded at this point and no
    // other test in this file touches the environment.
    unsafe {
        std::env::set_var("STEWARD_MONITOR", "postgres://steward@env-monitor/steward");
        std::env::set_var("STEWARD_NODE_NAME", "from-env");
        std::env::set_var("STEWARD_CANDIDATE_PRIORITY", "0");
        std::env::set_var("STEWARD_REPLICATION_QUORUM", "false");
        std::env::set_var("PGDATA", "/env/pgdata");
    }

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.monitor, "postgres://steward@env-monitor/steward");
    assert_eq!(config.node_name.as_deref(), Some("from-env"));
    assert_eq!(config.replication.candidate_priority, 0);
    assert!(!config.replication.replication_quorum);
    assert_eq!(config.postgresql.pgdata, std::path::Path::new("/env/pgdata"));
}
