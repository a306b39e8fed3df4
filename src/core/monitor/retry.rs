// src/core/monitor/retry.rs

//! Connection and transaction retry with capped exponential backoff.
//!
//! Two named policies are used throughout: the unbounded "service" policy
//! for the node-active loop, and the budgeted "interactive" policy for
//! one-shot calls an operator is waiting on.

use rand::Rng;
use std::time::{Duration, Instant};

/// The shape of a backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
    /// Relative jitter applied to every delay, e.g. 0.2 for plus or minus 20%.
    pub jitter: f64,
    /// Maximum number of attempts; `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Overall wall-clock budget; `None` is unbounded.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Unbounded retries for long-lived services. The loop keeps trying
    /// for as long as the service runs, capped at 30s between attempts.
    pub fn service() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            factor: 2,
            jitter: 0.2,
            max_attempts: None,
            deadline: None,
        }
    }

    /// A short budget for calls an operator is waiting on.
    pub fn interactive() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2,
            jitter: 0.2,
            max_attempts: Some(10),
            deadline: Some(Duration::from_secs(15)),
        }
    }

    /// The undithered delay before attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = (self.factor as u64).saturating_pow(attempt.saturating_sub(1));
        let raw = self
            .base_delay
            .saturating_mul(factor.min(u32::MAX as u64) as u32);
        raw.min(self.max_delay)
    }
}

/// Tracks attempts against a policy and hands out the next sleep.
#[derive(Debug)]
pub struct Retrier {
    policy: RetryPolicy,
    attempts: u32,
    started: Instant,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            started: Instant::now(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the jittered delay to sleep before the next attempt, or
    /// `None` when the policy's budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;

        if let Some(max) = self.policy.max_attempts
            && self.attempts > max
        {
            return None;
        }
        if let Some(deadline) = self.policy.deadline
            && self.started.elapsed() >= deadline
        {
            return None;
        }

        let base = self.policy.delay_for_attempt(self.attempts);
        Some(apply_jitter(base, self.policy.jitter))
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = rand::thread_rng().gen_range(-jitter..=jitter);
    delay.mul_f64(1.0 + spread)
}

/// SQLSTATE classes the monitor client treats as transient: lock and
/// serialization contention, and the whole connection-exception class
/// covering the monitor's restart window.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57P03", // cannot_connect_now
    "57P01", // admin_shutdown
    "53300", // too_many_connections
    "08000", "08001", "08003", "08004", "08006", "08007",
];

pub fn is_transient_sqlstate(code: &str) -> bool {
    TRANSIENT_SQLSTATES.contains(&code)
}

/// Classifies a postgres client error: connection losses and the
/// transient SQLSTATE set may be retried, anything else is surfaced.
pub fn is_transient_pg_error(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    if let Some(db_error) = err.as_db_error() {
        return is_transient_sqlstate(db_error.code().code());
    }
    // Errors without a server-side code are I/O-level (connect refused,
    // reset, timeout) and worth retrying.
    use std::error::Error as _;
    err.source()
        .is_some_and(|source| source.is::<std::io::Error>())
}
