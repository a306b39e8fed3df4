// src/core/supervisor/mod.rs

//! Supervision of the keeper's long-lived services: start them in
//! declared order, restart crashed ones under a bounded budget, and
//! translate signals into a graduated shutdown.

pub mod pidfile;

pub use pidfile::PidLock;

use crate::core::errors::StewardError;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// The shutdown level broadcast to every service. Repeated signals
/// escalate the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownMode {
    Graceful,
    Fast,
    Immediate,
}

impl ShutdownMode {
    pub fn escalate(self) -> Self {
        match self {
            ShutdownMode::Graceful => ShutdownMode::Fast,
            _ => ShutdownMode::Immediate,
        }
    }
}

/// What to do when a service exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart under the bounded budget; exceeding it deactivates the
    /// service instead of taking the whole tree down.
    Always,
    /// Any exit stops the whole process tree.
    Never,
}

pub type ServiceFuture = Pin<Box<dyn Future<Output = Result<(), StewardError>> + Send>>;

/// A supervised service: a name, a restart policy, and a factory that
/// produces a fresh run of the service each time it is (re)started.
pub struct Service {
    pub name: &'static str,
    pub restart: RestartPolicy,
    pub factory: Box<dyn Fn() -> ServiceFuture + Send>,
}

impl Service {
    pub fn new<F>(name: &'static str, restart: RestartPolicy, factory: F) -> Self
    where
        F: Fn() -> ServiceFuture + Send + 'static,
    {
        Self {
            name,
            restart,
            factory: Box::new(factory),
        }
    }
}

/// A bounded restart budget: at most `max_attempts` restarts within a
/// sliding `window`.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    max_attempts: u32,
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl RestartBudget {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: VecDeque::new(),
        }
    }

    /// Records a restart attempt; returns whether it is still within
    /// budget.
    pub fn try_restart(&mut self) -> bool {
        self.try_restart_at(Instant::now())
    }

    /// Same as [`Self::try_restart`] with an explicit clock, for tests.
    pub fn try_restart_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.attempts.front() {
            if now.duration_since(oldest) > self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() as u32 >= self.max_attempts {
            return false;
        }
        self.attempts.push_back(now);
        true
    }
}

impl Default for RestartBudget {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// An exit that happens this soon after a (re)start counts as a failure
/// to start at all.
const STARTUP_GRACE: Duration = Duration::from_secs(5);

/// The supervisor: owns the PID lock and the set of services.
pub struct Supervisor {
    pid_path: PathBuf,
    services: Vec<Service>,
    shutdown_tx: broadcast::Sender<ShutdownMode>,
}

impl Supervisor {
    pub fn new(pid_path: PathBuf, shutdown_tx: broadcast::Sender<ShutdownMode>) -> Self {
        Self {
            pid_path,
            services: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn add_service(&mut self, service: Service) {
        self.services.push(service);
    }

    /// Runs until every service has stopped. Signals are handled here:
    /// SIGINT/SIGTERM escalate graceful -> fast -> immediate, SIGQUIT
    /// jumps straight to immediate.
    pub async fn run(self) -> Result<(), StewardError> {
        let _pid_lock = PidLock::acquire(&self.pid_path)?;

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigquit = signal(SignalKind::quit())?;

        let mut tasks: JoinSet<(usize, Result<(), StewardError>)> = JoinSet::new();
        let mut budgets: Vec<RestartBudget> = Vec::new();
        let mut started_at: Vec<Instant> = Vec::new();
        let mut ever_restarted: Vec<bool> = Vec::new();
        for (index, service) in self.services.iter().enumerate() {
            info!("starting service \"{}\"", service.name);
            let run = (service.factory)();
            tasks.spawn(async move { (index, run.await) });
            budgets.push(RestartBudget::default());
            started_at.push(Instant::now());
            ever_restarted.push(false);
        }

        let mut shutdown: Option<ShutdownMode> = None;
        let mut first_failure: Option<StewardError> = None;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    shutdown = Some(escalated(shutdown));
                    self.announce_shutdown(shutdown.expect("just set"), "SIGINT");
                }
                _ = sigterm.recv() => {
                    shutdown = Some(escalated(shutdown));
                    self.announce_shutdown(shutdown.expect("just set"), "SIGTERM");
                }
                _ = sigquit.recv() => {
                    shutdown = Some(ShutdownMode::Immediate);
                    self.announce_shutdown(ShutdownMode::Immediate, "SIGQUIT");
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        // Every service has stopped.
                        break;
                    };
                    let (index, result) = match joined {
                        Ok(exit) => exit,
                        Err(join_error) => {
                            // A panicking service carries no index; that
                            // is a programmer error, stop everything.
                            error!("a service panicked: {join_error}");
                            first_failure.get_or_insert(StewardError::Bug(format!(
                                "service panicked: {join_error}"
                            )));
                            shutdown = Some(ShutdownMode::Fast);
                            self.announce_shutdown(ShutdownMode::Fast, "panic");
                            continue;
                        }
                    };
                    let service = &self.services[index];

                    if shutdown.is_some() {
                        log_exit(service.name, &result);
                        continue;
                    }

                    match &result {
                        Ok(()) => info!("service \"{}\" exited cleanly", service.name),
                        Err(e) => error!(
                            "service \"{}\" failed (exit code {}): {e}",
                            service.name,
                            e.exit_code()
                        ),
                    }

                    // A first-attempt exit within the grace period means
                    // the service never managed to start.
                    let failed_to_start = !ever_restarted[index]
                        && result.is_err()
                        && started_at[index].elapsed() < STARTUP_GRACE;

                    if failed_to_start || service.restart == RestartPolicy::Never {
                        if let Err(e) = result {
                            first_failure.get_or_insert(e);
                        }
                        shutdown = Some(ShutdownMode::Fast);
                        self.announce_shutdown(ShutdownMode::Fast, service.name);
                        continue;
                    }

                    if budgets[index].try_restart() {
                        warn!("restarting service \"{}\"", service.name);
                        let run = (self.services[index].factory)();
                        started_at[index] = Instant::now();
                        ever_restarted[index] = true;
                        tasks.spawn(async move { (index, run.await) });
                    } else {
                        // Out of budget: deactivate this service rather
                        // than taking the whole tree down.
                        warn!(
                            "service \"{}\" exceeded its restart budget and is deactivated",
                            self.services[index].name
                        );
                    }
                }
            }

            if shutdown.is_some() && tasks.is_empty() {
                break;
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => {
                info!("supervisor stopped");
                Ok(())
            }
        }
    }

    fn announce_shutdown(&self, mode: ShutdownMode, cause: &str) {
        info!("{cause}: initiating {mode:?} shutdown");
        // No receivers just means every service already stopped.
        let _ = self.shutdown_tx.send(mode);
    }
}

fn escalated(current: Option<ShutdownMode>) -> ShutdownMode {
    match current {
        None => ShutdownMode::Graceful,
        Some(mode) => mode.escalate(),
    }
}

fn log_exit(name: &str, result: &Result<(), StewardError>) {
    match result {
        Ok(()) => info!("service \"{name}\" stopped"),
        Err(e) => warn!("service \"{name}\" stopped with error: {e}"),
    }
}
