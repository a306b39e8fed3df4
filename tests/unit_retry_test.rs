use std::time::Duration;
use steward::core::monitor::retry::{RetryPolicy, Retrier, is_transient_sqlstate};

#[test]
fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::service();
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    // Far beyond the cap never overflows.
    assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(30));
    assert_eq!(policy.delay_for_attempt(1000), Duration::from_secs(30));
}

#[test]
fn test_jitter_stays_within_bounds() {
    let policy = RetryPolicy::service();
    let mut retrier = Retrier::new(policy.clone());
    for attempt in 1..=20u32 {
        let delay = retrier.next_delay().expect("service policy is unbounded");
        let base = policy.delay_for_attempt(attempt);
        let low = base.mul_f64(1.0 - policy.jitter);
        let high = base.mul_f64(1.0 + policy.jitter);
        assert!(
            delay >= low && delay <= high,
            "attempt {attempt}: {delay:?} outside [{low:?}, {high:?}]"
        );
    }
}

#[test]
fn test_service_policy_is_unbounded() {
    let mut retrier = Retrier::new(RetryPolicy::service());
    for _ in 0..1000 {
        assert!(retrier.next_delay().is_some());
    }
}

#[test]
fn test_interactive_policy_has_an_attempt_budget() {
    let policy = RetryPolicy::interactive();
    let max = policy.max_attempts.unwrap();
    let mut retrier = Retrier::new(policy);
    let mut granted = 0;
    while retrier.next_delay().is_some() {
        granted += 1;
        assert!(granted <= max, "budget not enforced");
    }
    assert_eq!(granted, max);
}

#[test]
fn test_interactive_deadline_expires() {
    let policy = RetryPolicy {
        deadline: Some(Duration::from_millis(0)),
        ..RetryPolicy::interactive()
    };
    let mut retrier = Retrier::new(policy);
    assert!(retrier.next_delay().is_none());
}

#[test]
fn test_transient_sqlstate_classification() {
    // Lock contention and the monitor restart window are retried.
    for code in ["40001", "40P01", "55P03", "57P03", "08006", "53300"] {
        assert!(is_transient_sqlstate(code), "{code} should be transient");
    }
    // Validation and schema errors are not.
    for code in ["42883", "22023", "23505", "42P01", "0A000"] {
        assert!(!is_transient_sqlstate(code), "{code} should be fatal");
    }
}
