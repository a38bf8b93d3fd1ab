use std::time::Duration;

use reelfeed_rs::Backoff;

fn policy() -> Backoff {
    Backoff::new(Duration::from_millis(1000), Duration::from_millis(30_000), 10)
}

// Delay doubles from the base until it hits the cap, and never decreases.
#[test]
fn test_delay_doubles_until_cap() {
    let backoff = policy();

    assert_eq!(backoff.next_delay(0), Duration::from_millis(1000));
    assert_eq!(backoff.next_delay(1), Duration::from_millis(2000));
    assert_eq!(backoff.next_delay(2), Duration::from_millis(4000));
    assert_eq!(backoff.next_delay(3), Duration::from_millis(8000));
    assert_eq!(backoff.next_delay(4), Duration::from_millis(16_000));
    // 32s would exceed the cap
    assert_eq!(backoff.next_delay(5), Duration::from_millis(30_000));
    assert_eq!(backoff.next_delay(10), Duration::from_millis(30_000));

    let mut previous = Duration::ZERO;
    for attempt in 0..=10 {
        let delay = backoff.next_delay(attempt);
        assert!(
            delay >= previous,
            "delay shrank at attempt {attempt}: {delay:?} < {previous:?}"
        );
        assert_eq!(
            delay,
            Duration::from_millis(1000u64.saturating_mul(1 << attempt).min(30_000))
        );
        previous = delay;
    }
}

// The budget boundary: attempt 10 is still allowed, attempt 11 is not.
#[test]
fn test_exhaustion_boundary() {
    let backoff = policy();

    assert!(!backoff.is_exhausted(0));
    assert!(!backoff.is_exhausted(9));
    assert!(!backoff.is_exhausted(10));
    assert!(backoff.is_exhausted(11));
    assert!(backoff.is_exhausted(u32::MAX));
}

// Huge attempt numbers must not overflow the shift.
#[test]
fn test_large_attempt_saturates_at_cap() {
    let backoff = policy();

    assert_eq!(backoff.next_delay(63), Duration::from_millis(30_000));
    assert_eq!(backoff.next_delay(u32::MAX), Duration::from_millis(30_000));
}

#[test]
fn test_defaults_match_documented_policy() {
    let backoff = Backoff::default();

    assert_eq!(backoff.next_delay(0), Duration::from_millis(1000));
    assert_eq!(backoff.next_delay(10), Duration::from_millis(30_000));
    assert!(!backoff.is_exhausted(10));
    assert!(backoff.is_exhausted(11));
}
