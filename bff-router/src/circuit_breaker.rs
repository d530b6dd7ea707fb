//! Endpoint health tracking.
//!
//! The transport asks the breaker before every call that opted into circuit breaking and
//! reports every outcome back. Endpoints are keyed by signature: `[method] url` without
//! the query string.
//!
//! ```text
//! untracked --monitor--> closed --failures >= threshold--> open
//!                          ^                                 |
//!                          |                          open_duration
//!                          |                                 v
//!                          +-------probe succeeds------- half-open
//!                                                            |
//!                                        probe fails --> open
//! ```
//!
//! A probe that never reports back (its call was dropped) expires after `open_duration`
//! and the next call becomes the probe.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

use crate::configuration;

/// Per-endpoint health, shared by every in-flight resolution.
#[cfg_attr(test, mockall::automock)]
pub trait CircuitBreaker: Send + Sync {
    /// Returns true when calls to `signature` must be rejected without any I/O.
    fn check(&self, signature: &str) -> bool;

    /// Starts tracking `signature`. Called on failure, before `record`.
    fn monitor(&self, signature: &str);

    /// Reports the outcome of a call to `signature`.
    fn record(&self, signature: &str, success: bool);
}

/// Used for calls that did not opt into circuit breaking: always closed, never tracks.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Disabled;

impl CircuitBreaker for Disabled {
    fn check(&self, _signature: &str) -> bool {
        false
    }

    fn monitor(&self, _signature: &str) {}

    fn record(&self, _signature: &str, _success: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    // a probe is in flight
    HalfOpen { since: Instant },
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct HealthTracker {
    failure_threshold: u32,
    open_duration: Duration,
    endpoints: Mutex<HashMap<String, State>>,
}

impl HealthTracker {
    pub fn new(config: &configuration::CircuitBreaker) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_duration: config.open_duration,
            endpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl CircuitBreaker for HealthTracker {
    fn check(&self, signature: &str) -> bool {
        let mut endpoints = self.endpoints.lock();
        let Some(state) = endpoints.get_mut(signature) else {
            return false;
        };
        let now = Instant::now();
        match *state {
            State::Closed { .. } => false,
            State::Open { until } if now < until => true,
            State::HalfOpen { since } if now.duration_since(since) < self.open_duration => true,
            State::Open { .. } | State::HalfOpen { .. } => {
                tracing::debug!(%signature, "circuit half-open, letting a probe through");
                *state = State::HalfOpen { since: now };
                false
            }
        }
    }

    fn monitor(&self, signature: &str) {
        self.endpoints
            .lock()
            .entry(signature.to_string())
            .or_insert(State::Closed { failures: 0 });
    }

    fn record(&self, signature: &str, success: bool) {
        let mut endpoints = self.endpoints.lock();
        let Some(state) = endpoints.get_mut(signature) else {
            return;
        };
        let next = match (*state, success) {
            (_, true) => State::Closed { failures: 0 },
            (State::Closed { failures }, false) if failures + 1 >= self.failure_threshold => {
                State::Open {
                    until: Instant::now() + self.open_duration,
                }
            }
            (State::Closed { failures }, false) => State::Closed {
                failures: failures + 1,
            },
            (State::HalfOpen { .. }, false) | (State::Open { .. }, false) => State::Open {
                until: Instant::now() + self.open_duration,
            },
        };
        if matches!(next, State::Open { .. }) && !matches!(*state, State::Open { .. }) {
            tracing::warn!(%signature, "circuit opened");
        }
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURE: &str = "[get] http://localhost/api";

    fn tracker(open_duration: Duration) -> HealthTracker {
        HealthTracker::new(&configuration::CircuitBreaker {
            failure_threshold: 2,
            open_duration,
        })
    }

    fn fail(tracker: &HealthTracker) {
        tracker.monitor(SIGNATURE);
        tracker.record(SIGNATURE, false);
    }

    #[test]
    fn untracked_signatures_stay_closed() {
        let tracker = tracker(Duration::from_secs(60));
        tracker.record(SIGNATURE, false);
        tracker.record(SIGNATURE, false);
        tracker.record(SIGNATURE, false);

        assert!(!tracker.check(SIGNATURE));
    }

    #[test]
    fn consecutive_failures_open_the_circuit() {
        let tracker = tracker(Duration::from_secs(60));
        fail(&tracker);
        assert!(!tracker.check(SIGNATURE));

        fail(&tracker);
        assert!(tracker.check(SIGNATURE));
        assert!(!tracker.check("[get] http://localhost/other"));
    }

    #[test]
    fn a_success_resets_the_failure_count() {
        let tracker = tracker(Duration::from_secs(60));
        fail(&tracker);
        tracker.record(SIGNATURE, true);
        fail(&tracker);

        assert!(!tracker.check(SIGNATURE));
    }

    #[test]
    fn half_open_lets_a_single_probe_through() {
        let tracker = tracker(Duration::from_millis(20));
        fail(&tracker);
        fail(&tracker);

        std::thread::sleep(Duration::from_millis(30));
        assert!(!tracker.check(SIGNATURE));
        assert!(tracker.check(SIGNATURE));

        tracker.record(SIGNATURE, true);
        assert!(!tracker.check(SIGNATURE));
        assert!(!tracker.check(SIGNATURE));
    }

    #[test]
    fn a_failed_probe_reopens_the_circuit() {
        let tracker = tracker(Duration::from_millis(20));
        fail(&tracker);
        fail(&tracker);
        assert!(tracker.check(SIGNATURE));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!tracker.check(SIGNATURE));
        fail(&tracker);
        assert!(tracker.check(SIGNATURE));
    }

    #[test]
    fn an_abandoned_probe_expires() {
        let tracker = tracker(Duration::from_millis(20));
        fail(&tracker);
        fail(&tracker);

        std::thread::sleep(Duration::from_millis(30));
        // the probe is handed out and never reported back
        assert!(!tracker.check(SIGNATURE));
        assert!(tracker.check(SIGNATURE));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!tracker.check(SIGNATURE));
        tracker.record(SIGNATURE, true);
        assert!(!tracker.check(SIGNATURE));
    }

    #[test]
    fn zero_open_duration_never_strands_a_signature() {
        let tracker = tracker(Duration::ZERO);
        fail(&tracker);
        fail(&tracker);

        assert!(!tracker.check(SIGNATURE));
        assert!(!tracker.check(SIGNATURE));
    }

    #[test]
    fn disabled_breaker_never_blocks() {
        let breaker = Disabled;
        breaker.monitor(SIGNATURE);
        breaker.record(SIGNATURE, false);
        assert!(!breaker.check(SIGNATURE));
    }
}
