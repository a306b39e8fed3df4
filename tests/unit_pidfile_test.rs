use steward::core::errors::StewardError;
use steward::core::supervisor::PidLock;

#[test]
fn test_acquire_and_release() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.pid");

    let lock = PidLock::acquire(&path).unwrap();
    let recorded: i32 = std::fs::read_to_string(&path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(recorded, std::process::id() as i32);

    drop(lock);
    assert!(!path.exists());
}

#[test]
fn test_live_holder_blocks_a_second_keeper() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.pid");

    // A pid file naming a live process (our own) must be respected.
    std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();
    match PidLock::acquire(&path) {
        Err(StewardError::AlreadyRunning { pid }) => {
            assert_eq!(pid, std::process::id() as i32);
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    // The held file is left in place.
    assert!(path.exists());
}

#[test]
fn test_stale_lock_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.pid");

    // No process with this pid can exist (beyond any real pid_max).
    std::fs::write(&path, "999999999\n").unwrap();
    let _lock = PidLock::acquire(&path).unwrap();
    let recorded: i32 = std::fs::read_to_string(&path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(recorded, std::process::id() as i32);
}

#[test]
fn test_garbage_content_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.pid");
    std::fs::write(&path, "not a pid\n").unwrap();
    assert!(PidLock::acquire(&path).is_ok());
}
