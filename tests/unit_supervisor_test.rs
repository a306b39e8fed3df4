use std::time::{Duration, Instant};
use steward::core::errors::{EXIT_CODE_BAD_CONFIG, StewardError};
use steward::core::supervisor::{
    PidLock, RestartBudget, RestartPolicy, Service, ShutdownMode, Supervisor,
};
use tokio::sync::broadcast;

#[test]
fn test_restart_budget_is_bounded() {
    let mut budget = RestartBudget::new(3, Duration::from_secs(60));
    let now = Instant::now();
    assert!(budget.try_restart_at(now));
    assert!(budget.try_restart_at(now + Duration::from_secs(1)));
    assert!(budget.try_restart_at(now + Duration::from_secs(2)));
    // Fourth attempt inside the window is refused.
    assert!(!budget.try_restart_at(now + Duration::from_secs(3)));
    // Once the window slides past the early attempts, restarts resume.
    assert!(budget.try_restart_at(now + Duration::from_secs(120)));
}

#[test]
fn test_shutdown_escalation() {
    assert_eq!(ShutdownMode::Graceful.escalate(), ShutdownMode::Fast);
    assert_eq!(ShutdownMode::Fast.escalate(), ShutdownMode::Immediate);
    assert_eq!(ShutdownMode::Immediate.escalate(), ShutdownMode::Immediate);
}

#[tokio::test]
async fn test_clean_oneshot_exit_stops_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let (shutdown_tx, _) = broadcast::channel(4);

    let mut supervisor = Supervisor::new(dir.path().join("steward.pid"), shutdown_tx.clone());
    supervisor.add_service(Service::new("oneshot", RestartPolicy::Never, || {
        Box::pin(async { Ok(()) })
    }));

    // A second service that runs until told to stop proves the fan-out
    // of the shutdown signal.
    let tx = shutdown_tx.clone();
    supervisor.add_service(Service::new("looper", RestartPolicy::Always, move || {
        let mut shutdown_rx = tx.subscribe();
        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    _ = shutdown_rx.recv() => return Ok(()),
                }
            }
        })
    }));

    let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .expect("supervisor must stop once the restart=never service exits");
    assert!(result.is_ok());
    // The pid lock is released on the way out.
    assert!(!dir.path().join("steward.pid").exists());
}

#[tokio::test]
async fn test_failed_startup_surfaces_the_error() {
    let dir = tempfile::tempdir().unwrap();
    let (shutdown_tx, _) = broadcast::channel(4);

    let mut supervisor = Supervisor::new(dir.path().join("steward.pid"), shutdown_tx);
    supervisor.add_service(Service::new("broken", RestartPolicy::Always, || {
        Box::pin(async { Err(StewardError::BadConfig("no data directory".to_string())) })
    }));

    let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .expect("supervisor must give up on a service that cannot start");
    let error = result.expect_err("startup failure must surface");
    assert_eq!(error.exit_code(), EXIT_CODE_BAD_CONFIG);
}

#[tokio::test]
async fn test_pid_lock_guards_the_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("steward.pid");
    let _held = PidLock::acquire(&pid_path).unwrap();

    let (shutdown_tx, _) = broadcast::channel(4);
    let supervisor = Supervisor::new(pid_path, shutdown_tx);
    match supervisor.run().await {
        Err(StewardError::AlreadyRunning { .. }) => {}
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
}
