//! The polling primitive every wait and retry loop is built on.
//!
//! The controlled application exposes no completion events, so readiness,
//! dialog appearance, and transient-failure retries are all the same shape:
//! probe, and if the answer is "not yet", sleep for `interval` until `timeout`
//! has elapsed.

use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{DriverError, UiError, UiErrorKind};

/// Zero intervals still advance time so a loop can never spin forever.
const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Source of time for polling loops.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time with real sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Time budget for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Answer of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Why a polling loop stopped without a value.
#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    /// The probe itself failed; the loop stops at once.
    Failed(E),
    /// Every probe answered `Pending` until the deadline.
    Expired { waited: Duration, attempts: u32 },
}

/// Run `probe` until it is ready, fails, or `policy.timeout` elapses.
///
/// The probe always runs at least once, and once more at (or just before) the
/// deadline, so a zero timeout still yields a single check.
pub fn poll<C, T, E, F>(clock: &C, policy: PollPolicy, mut probe: F) -> Result<T, PollError<E>>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<Poll<T>, E>,
{
    let start = clock.now();
    let deadline = start + policy.timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Poll::Ready(value) = probe().map_err(PollError::Failed)? {
            return Ok(value);
        }
        let now = clock.now();
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return Err(PollError::Expired {
                waited: now.duration_since(start),
                attempts,
            });
        }
        trace!(attempts, remaining_ms = remaining.as_millis() as u64, "poll pending");
        clock.sleep(policy.interval.min(remaining).max(MIN_SLEEP));
    }
}

/// Retry `action` while it fails with one of the `retry_on` kinds.
///
/// Any other failure is returned immediately, without a second attempt.
/// Exhausting the budget yields [`DriverError::Timeout`] carrying the last
/// transient failure.
pub fn retry_transient<C, T, F>(
    clock: &C,
    policy: PollPolicy,
    retry_on: &[UiErrorKind],
    what: &str,
    mut action: F,
) -> Result<T, DriverError>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<T, UiError>,
{
    let mut last: Option<UiError> = None;
    let outcome = poll(clock, policy, || match action() {
        Ok(value) => Ok(Poll::Ready(value)),
        Err(err) if retry_on.contains(&err.kind()) => {
            trace!(what, err = %err, "transient failure, retrying");
            last = Some(err);
            Ok(Poll::Pending)
        }
        Err(err) => Err(err),
    });
    match outcome {
        Ok(value) => Ok(value),
        Err(PollError::Failed(err)) => Err(DriverError::from(err)),
        Err(PollError::Expired { waited, .. }) => Err(DriverError::Timeout {
            what: what.to_string(),
            waited,
            last,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeClock;
    use std::cell::Cell;

    fn policy(timeout_ms: u64, interval_ms: u64) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }

    #[test]
    fn ready_on_first_probe_does_not_sleep() {
        let clock = FakeClock::new();
        let value: Result<u32, PollError<()>> = poll(&clock, policy(1000, 100), || Ok(Poll::Ready(7)));
        assert_eq!(value, Ok(7));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn expires_after_timeout_with_final_probe_at_deadline() {
        let clock = FakeClock::new();
        let probes = Cell::new(0u32);
        let result: Result<(), PollError<()>> = poll(&clock, policy(1000, 300), || {
            probes.set(probes.get() + 1);
            Ok(Poll::Pending)
        });
        // Probes at 0, 300, 600, 900 and 1000 ms.
        assert_eq!(
            result,
            Err(PollError::Expired {
                waited: Duration::from_millis(1000),
                attempts: 5
            })
        );
        assert_eq!(probes.get(), 5);
    }

    #[test]
    fn zero_timeout_still_probes_once() {
        let clock = FakeClock::new();
        let result: Result<(), PollError<()>> = poll(&clock, policy(0, 100), || Ok(Poll::Pending));
        assert!(matches!(result, Err(PollError::Expired { attempts: 1, .. })));
    }

    #[test]
    fn zero_interval_terminates() {
        let clock = FakeClock::new();
        let result: Result<(), PollError<()>> = poll(&clock, policy(5, 0), || Ok(Poll::Pending));
        assert!(matches!(result, Err(PollError::Expired { .. })));
    }

    #[test]
    fn probe_failure_stops_immediately() {
        let clock = FakeClock::new();
        let result: Result<(), PollError<&str>> = poll(&clock, policy(1000, 100), || Err("boom"));
        assert_eq!(result, Err(PollError::Failed("boom")));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn retry_recovers_after_transient_failures() {
        let clock = FakeClock::new();
        let calls = Cell::new(0u32);
        let value = retry_transient(
            &clock,
            policy(10_000, 500),
            &[UiErrorKind::Disabled],
            "menu File->Open",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(UiError::Disabled("File->Open".to_string()))
                } else {
                    Ok("selected")
                }
            },
        )
        .expect("retry");
        assert_eq!(value, "selected");
        assert_eq!(calls.get(), 3);
        assert_eq!(clock.elapsed(), Duration::from_millis(1000));
    }

    #[test]
    fn retry_does_not_repeat_non_retryable_failures() {
        let clock = FakeClock::new();
        let calls = Cell::new(0u32);
        let err = retry_transient(
            &clock,
            policy(10_000, 500),
            &[UiErrorKind::Disabled, UiErrorKind::NotReady],
            "menu File->Bogus",
            || -> Result<(), UiError> {
                calls.set(calls.get() + 1);
                Err(UiError::NotFound("File->Bogus".to_string()))
            },
        )
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(matches!(err, DriverError::Ui(UiError::NotFound(_))));
    }

    #[test]
    fn retry_exhaustion_becomes_timeout_with_last_error() {
        let clock = FakeClock::new();
        let err = retry_transient(
            &clock,
            policy(2_000, 500),
            &[UiErrorKind::NotReady],
            "menu Generate",
            || -> Result<(), UiError> { Err(UiError::NotReady("Generate".to_string())) },
        )
        .unwrap_err();
        match err {
            DriverError::Timeout { what, waited, last } => {
                assert_eq!(what, "menu Generate");
                assert_eq!(waited, Duration::from_secs(2));
                assert_eq!(last, Some(UiError::NotReady("Generate".to_string())));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
