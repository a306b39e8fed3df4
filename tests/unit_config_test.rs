use std::io::Write;
use std::time::Duration;
use steward::config::Config;
use steward::core::errors::StewardError;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const MINIMAL: &str = r#"
hostname = "db1.internal"
monitor = "postgres://steward@monitor:5432/steward"

[postgresql]
pgdata = "/var/lib/postgresql/data"
"#;

#[test]
fn test_minimal_config_gets_defaults() {
    let file = write_config(MINIMAL);
    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.formation, "default");
    assert_eq!(config.group, None);
    assert_eq!(config.node_name, None);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.postgresql.port, 5432);
    assert_eq!(config.postgresql.host, "localhost");
    assert_eq!(config.postgresql.dbname, "postgres");
    assert_eq!(config.replication.candidate_priority, 50);
    assert!(config.replication.replication_quorum);
    assert_eq!(config.replication.maximum_backup_rate, "100M");
    assert_eq!(config.timeouts.cycle_time, Duration::from_secs(5));
    assert_eq!(config.source_path(), file.path());
}

#[test]
fn test_full_config_parses() {
    let file = write_config(
        r#"
formation = "billing"
group = 0
node_name = "pg-eu-1"
hostname = "pg-eu-1.internal"
monitor = "postgres://steward@monitor/steward"
state_directory = "/var/lib/steward"
log_level = "debug"

[postgresql]
pgdata = "/srv/pgdata"
port = 5433
bindir = "/usr/lib/postgresql/16/bin"

[replication]
candidate_priority = 80
replication_quorum = false
maximum_backup_rate = "50M"

[hba]
level = "lan"

[ssl]
self_signed = true

[timeouts]
cycle_time = "2s"
postgres_start = "1m"
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.formation, "billing");
    assert_eq!(config.group, Some(0));
    assert_eq!(config.node_name.as_deref(), Some("pg-eu-1"));
    assert_eq!(config.postgresql.port, 5433);
    assert_eq!(config.replication.candidate_priority, 80);
    assert!(!config.replication.replication_quorum);
    assert!(config.ssl.self_signed);
    assert_eq!(config.timeouts.cycle_time, Duration::from_secs(2));
    assert_eq!(config.timeouts.postgres_start, Duration::from_secs(60));

    let setup = config.postgres_setup();
    assert_eq!(
        setup.pg_ctl,
        std::path::Path::new("/usr/lib/postgresql/16/bin/pg_ctl")
    );
    assert_eq!(setup.port, 5433);
}

#[test]
fn test_candidate_priority_is_validated() {
    let file = write_config(
        r#"
hostname = "db1"
monitor = "postgres://steward@monitor/steward"

[postgresql]
pgdata = "/srv/pgdata"

[replication]
candidate_priority = 101
"#,
    );
    assert!(matches!(
        Config::from_file(file.path()),
        Err(StewardError::BadConfig(_))
    ));
}

#[test]
fn test_bad_monitor_uri_is_rejected() {
    let file = write_config(
        r#"
hostname = "db1"
monitor = "not a uri"

[postgresql]
pgdata = "/srv/pgdata"
"#,
    );
    assert!(matches!(
        Config::from_file(file.path()),
        Err(StewardError::BadConfig(_))
    ));
}

#[test]
fn test_missing_hostname_is_rejected() {
    let file = write_config(
        r#"
monitor = "postgres://steward@monitor/steward"

[postgresql]
pgdata = "/srv/pgdata"
"#,
    );
    assert!(matches!(
        Config::from_file(file.path()),
        Err(StewardError::BadConfig(_))
    ));
}

#[test]
fn test_standby_options_application_name() {
    let file = write_config(MINIMAL);
    let config = Config::from_file(file.path()).unwrap();
    // Without a configured node name the application name is derived
    // from the monitor-assigned node id.
    assert_eq!(config.standby_options(4).application_name, "steward_4");
}
