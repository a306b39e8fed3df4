// src/core/keeper/service.rs

//! Assembles the keeper's supervised services: the node-active loop,
//! the notification listener feeding it wakeup hints, and the Postgres
//! run-state controller.

use crate::config::Config;
use crate::core::errors::StewardError;
use crate::core::keeper::Keeper;
use crate::core::monitor::notifications::{
    CHANNEL_LOG, CHANNEL_STATE, NotificationListener, parse_if_state,
};
use crate::core::postgres::control::{PostgresController, StopMode};
use crate::core::state::StateDir;
use crate::core::supervisor::{RestartPolicy, Service, ShutdownMode, Supervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Consecutive Postgres start failures tolerated by the controller
/// before it gives up and lets the supervisor decide.
const MAX_START_FAILURES: u32 = 5;

/// The keeper's main entry point: builds the supervisor, wires the
/// services together, and runs until shutdown.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<(), StewardError> {
    let state_dir = StateDir::new(&config.state_directory);
    state_dir.ensure_exists()?;

    let (shutdown_tx, _) = broadcast::channel(4);
    let (config_tx, config_rx) = watch::channel(Arc::new(config));
    let wakeup = Arc::new(Notify::new());

    spawn_sighup_handler(config_tx, log_reload_handle);

    let mut supervisor = Supervisor::new(state_dir.pid_path(), shutdown_tx.clone());
    supervisor.add_service(node_active_service(
        config_rx.clone(),
        shutdown_tx.clone(),
        wakeup.clone(),
    ));
    supervisor.add_service(listener_service(
        config_rx.clone(),
        shutdown_tx.clone(),
        state_dir.clone(),
        wakeup,
    ));
    supervisor.add_service(postgres_service(config_rx, shutdown_tx, state_dir));
    supervisor.run().await
}

/// SIGHUP rebuilds the configuration value atomically and republishes
/// it; running services pick it up at their next checkpoint.
fn spawn_sighup_handler(
    config_tx: watch::Sender<Arc<Config>>,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(sighup) => sighup,
            Err(e) => {
                error!("cannot install SIGHUP handler: {e}");
                return;
            }
        };
        loop {
            sighup.recv().await;
            let path = config_tx.borrow().source_path().to_path_buf();
            info!("SIGHUP received, re-reading {}", path.display());
            match Config::from_file(&path) {
                Ok(fresh) => {
                    if let Err(e) = log_reload_handle.reload(EnvFilter::new(&fresh.log_level)) {
                        warn!("could not reload the log filter: {e}");
                    }
                    let _ = config_tx.send(Arc::new(fresh));
                }
                Err(e) => error!("keeping the previous configuration: {e}"),
            }
        }
    });
}

/// The node-active loop: observe, report, transition or reconcile,
/// persist, sleep. The sleep is cut short by a relevant state
/// notification or by shutdown.
fn node_active_service(
    config_rx: watch::Receiver<Arc<Config>>,
    shutdown_tx: broadcast::Sender<ShutdownMode>,
    wakeup: Arc<Notify>,
) -> Service {
    Service::new("node-active", RestartPolicy::Always, move || {
        let config_rx = config_rx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let wakeup = wakeup.clone();
        Box::pin(async move {
            let initial_config = config_rx.borrow().clone();
            let mut keeper = Keeper::bootstrap(initial_config).await?;
            loop {
                // A SIGHUP reload swaps the config between cycles.
                keeper.config = config_rx.borrow().clone();
                keeper.run_cycle().await?;

                let cycle_time = keeper.config.timeouts.cycle_time;
                tokio::select! {
                    _ = tokio::time::sleep(cycle_time) => {}
                    _ = wakeup.notified() => {
                        debug!("woken early by a state notification");
                    }
                    mode = shutdown_rx.recv() => {
                        info!("node-active loop stopping ({mode:?})");
                        return Ok(());
                    }
                }
            }
        })
    })
}

/// Drains the monitor's pub/sub channels and wakes the node-active loop
/// when a notification concerns this node's group.
fn listener_service(
    config_rx: watch::Receiver<Arc<Config>>,
    shutdown_tx: broadcast::Sender<ShutdownMode>,
    state_dir: StateDir,
    wakeup: Arc<Notify>,
) -> Service {
    Service::new("listener", RestartPolicy::Always, move || {
        let config_rx = config_rx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let state_dir = state_dir.clone();
        let wakeup = wakeup.clone();
        Box::pin(async move {
            let config = config_rx.borrow().clone();
            let mut listener =
                NotificationListener::connect(&config.monitor, &[CHANNEL_STATE, CHANNEL_LOG])
                    .await?;
            loop {
                tokio::select! {
                    received = listener.recv() => {
                        let Some(notification) = received else {
                            // Restarting the service re-subscribes.
                            return Err(StewardError::MonitorUnreachable(
                                "notification subscription closed".to_string(),
                            ));
                        };
                        match parse_if_state(&notification) {
                            Some(Ok(state)) => {
                                let ours = state_dir
                                    .load_keeper_state()
                                    .map(|s| state.concerns_group(&config.formation, s.group_id))
                                    .unwrap_or(false);
                                if ours {
                                    wakeup.notify_one();
                                }
                            }
                            Some(Err(e)) => warn!("ignoring malformed state notification: {e}"),
                            None => {}
                        }
                    }
                    mode = shutdown_rx.recv() => {
                        info!("notification listener stopping ({mode:?})");
                        return Ok(());
                    }
                }
            }
        })
    })
}

/// Reconciles the Postgres run-state with the `pg` record written by
/// the node-active loop, and stops Postgres on shutdown with a mode
/// matching the requested level.
fn postgres_service(
    config_rx: watch::Receiver<Arc<Config>>,
    shutdown_tx: broadcast::Sender<ShutdownMode>,
    state_dir: StateDir,
) -> Service {
    Service::new("postgres", RestartPolicy::Always, move || {
        let config_rx = config_rx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let state_dir = state_dir.clone();
        Box::pin(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut start_failures = 0u32;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let config = config_rx.borrow().clone();
                        let controller = PostgresController::new(
                            config.postgres_setup(),
                            config.timeouts.postgres_start,
                        );
                        let expected = state_dir.load_pg_status().unwrap_or_default();
                        if expected.expects_running() && !controller.is_running() {
                            warn!("postgres stopped unexpectedly, restarting it");
                            match controller.start().await {
                                Ok(()) => start_failures = 0,
                                Err(e) => {
                                    start_failures += 1;
                                    error!("postgres restart failed ({start_failures}/{MAX_START_FAILURES}): {e}");
                                    if start_failures >= MAX_START_FAILURES {
                                        return Err(e);
                                    }
                                }
                            }
                        } else if expected == crate::core::state::ExpectedPostgresStatus::Stopped
                            && controller.is_running()
                        {
                            controller.stop(StopMode::Fast).await?;
                        } else {
                            start_failures = 0;
                        }
                    }
                    mode = shutdown_rx.recv() => {
                        let mode = mode.unwrap_or(ShutdownMode::Fast);
                        let stop_mode = match mode {
                            ShutdownMode::Graceful => StopMode::Smart,
                            ShutdownMode::Fast => StopMode::Fast,
                            ShutdownMode::Immediate => StopMode::Immediate,
                        };
                        let config = config_rx.borrow().clone();
                        let controller = PostgresController::new(
                            config.postgres_setup(),
                            config.timeouts.postgres_start,
                        );
                        info!("postgres controller stopping ({mode:?})");
                        return controller.stop(stop_mode).await;
                    }
                }
            }
        })
    })
}
