//! Circuit breaker guarding notification egress.
//!
//! Failure-window state machine: CLOSED records the last `window_size`
//! outcomes and opens once a full window holds `failure_threshold`
//! failures; OPEN fails fast until `open_timeout` has passed; HALF_OPEN
//! admits exactly one trial call. Only timeouts, connection errors, and
//! HTTP >= 500 count as failures; 4xx (429 included) stay out of the
//! window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use utoipa::ToSchema;

pub const DEFAULT_WINDOW_SIZE: usize = 10;
pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Observable breaker state for the status endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: usize,
    pub window_size: usize,
    /// Seconds since the breaker opened; absent while closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_open_secs: Option<u64>,
}

enum State {
    Closed,
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

struct Inner {
    state: State,
    /// Last outcomes, oldest first; `true` marks a failure.
    window: VecDeque<bool>,
}

pub struct CircuitBreaker {
    name: String,
    window_size: usize,
    failure_threshold: usize,
    open_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: &str,
        window_size: usize,
        failure_threshold: usize,
        open_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            window_size,
            failure_threshold,
            open_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                window: VecDeque::with_capacity(window_size),
            }),
        }
    }

    pub fn with_defaults(name: &str) -> Self {
        Self::new(
            name,
            DEFAULT_WINDOW_SIZE,
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_OPEN_TIMEOUT,
        )
    }

    /// Ask to pass a call through.
    ///
    /// `Err` carries the time until the next half-open trial; callers must
    /// not touch the downstream. An `Ok` must be followed by exactly one
    /// `record_success`/`record_failure`.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => Ok(()),
            State::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.open_timeout {
                    inner.state = State::HalfOpen {
                        trial_in_flight: true,
                    };
                    Ok(())
                } else {
                    Err(self.open_timeout - elapsed)
                }
            }
            State::HalfOpen {
                ref mut trial_in_flight,
            } => {
                if *trial_in_flight {
                    Err(Duration::ZERO)
                } else {
                    *trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => {
                Self::push(&mut inner.window, false, self.window_size);
            }
            State::HalfOpen { .. } => {
                // Trial succeeded; downstream has recovered.
                inner.state = State::Closed;
                inner.window.clear();
            }
            State::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => {
                Self::push(&mut inner.window, true, self.window_size);
                let failures = inner.window.iter().filter(|f| **f).count();
                if inner.window.len() == self.window_size && failures >= self.failure_threshold {
                    tracing::warn!(breaker = %self.name, failures, "circuit breaker opened");
                    inner.state = State::Open {
                        since: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                // Trial failed; reopen and restart the timer.
                inner.state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Force the breaker closed and forget the window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Closed;
        inner.window.clear();
        tracing::info!(breaker = %self.name, "circuit breaker reset");
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().unwrap();
        let (state, since) = match inner.state {
            State::Closed => (BreakerState::Closed, None),
            State::Open { since } => (BreakerState::Open, Some(since)),
            State::HalfOpen { .. } => (BreakerState::HalfOpen, None),
        };
        BreakerStatus {
            name: self.name.clone(),
            state,
            failure_count: inner.window.iter().filter(|f| **f).count(),
            window_size: self.window_size,
            time_since_open_secs: since.map(|s| s.elapsed().as_secs()),
        }
    }

    fn push(window: &mut VecDeque<bool>, outcome: bool, size: usize) {
        if window.len() == size {
            window.pop_front();
        }
        window.push_back(outcome);
    }
}

/// Per-name breaker singletons.
#[derive(Clone, Default)]
pub struct BreakerRegistry {
    breakers: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the breaker for `name`, creating a default-configured one on
    /// first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::with_defaults(name)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 10, 5, Duration::from_millis(50))
    }

    fn fill(breaker: &CircuitBreaker, outcomes: &[bool]) {
        for failure in outcomes {
            assert!(breaker.try_acquire().is_ok());
            if *failure {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
    }

    #[test]
    fn opens_at_five_failures_in_full_window() {
        let breaker = quick_breaker();
        fill(
            &breaker,
            &[
                true, false, true, false, true, false, true, false, true, false,
            ],
        );
        assert_eq!(breaker.status().state, BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = quick_breaker();
        fill(
            &breaker,
            &[
                true, true, true, true, false, false, false, false, false, false,
            ],
        );
        assert_eq!(breaker.status().state, BreakerState::Closed);
        assert_eq!(breaker.status().failure_count, 4);
    }

    #[test]
    fn stays_closed_until_window_is_full() {
        let breaker = quick_breaker();
        fill(&breaker, &[true; 5]);
        // Five straight failures, but only five outcomes recorded.
        assert_eq!(breaker.status().state, BreakerState::Closed);
    }

    #[test]
    fn decision_uses_only_last_ten_outcomes() {
        let breaker = quick_breaker();
        // Five early failures slide out of the window.
        fill(&breaker, &[true; 5]);
        fill(&breaker, &[false; 10]);
        assert_eq!(breaker.status().state, BreakerState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
    }

    #[tokio::test]
    async fn half_open_admits_one_trial_and_success_closes() {
        let breaker = quick_breaker();
        fill(&breaker, &[true; 10]);
        assert_eq!(breaker.status().state, BreakerState::Open);
        assert!(breaker.try_acquire().is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;

        // First attempt after the timeout becomes the trial.
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.status().state, BreakerState::HalfOpen);
        // Concurrent attempts are rejected while the trial is in flight.
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.status().state, BreakerState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = quick_breaker();
        fill(&breaker, &[true; 10]);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.status().state, BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn reset_forces_closed() {
        let breaker = quick_breaker();
        fill(&breaker, &[true; 10]);
        assert_eq!(breaker.status().state, BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.status().state, BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn registry_returns_same_instance() {
        let registry = BreakerRegistry::new();
        let a = registry.get("notify");
        let b = registry.get("notify");
        assert!(Arc::ptr_eq(&a, &b));

        a.record_failure();
        assert_eq!(b.status().failure_count, 1);
    }
}
