//! Sliding-window circuit breaker per (provider, model).
//!
//! Outcomes are recorded into a 60 s sliding window; once at least 20 samples
//! exist and half or more failed, the breaker opens for a 30 s cool-down.
//! While open, dispatch fails fast with `breaker-open` and the router sees
//! the target as unavailable. After the cool-down the breaker closes with a
//! cleared window. Transitions are returned to the caller so availability
//! flags and metrics stay in sync, and observed state is always an atomic
//! snapshot under the internal lock.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Sliding window length.
const WINDOW: Duration = Duration::from_secs(60);
/// Cool-down once open.
const COOLDOWN: Duration = Duration::from_secs(30);
/// Minimum samples before the error ratio is meaningful.
const MIN_SAMPLES: usize = 20;
/// Failure ratio that opens the breaker.
const THRESHOLD: f64 = 0.5;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

/// State transition produced by a record or a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Closed,
}

struct Inner {
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
}

/// One breaker instance.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                opened_at: None,
            }),
        }
    }

    fn prune(inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.samples.front() {
            if now.duration_since(*at) > WINDOW {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records an outcome (`ok = false` for 5xx or timeout) and returns the
    /// transition it caused, if any.
    pub fn record(&self, ok: bool) -> Option<Transition> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        // An open breaker ignores traffic that races the opening.
        if inner.opened_at.is_some() {
            return None;
        }

        Self::prune(&mut inner, now);
        inner.samples.push_back((now, ok));

        let total = inner.samples.len();
        if total < MIN_SAMPLES {
            return None;
        }
        let failures = inner.samples.iter().filter(|(_, ok)| !ok).count();
        if failures as f64 / total as f64 >= THRESHOLD {
            inner.opened_at = Some(now);
            inner.samples.clear();
            return Some(Transition::Opened);
        }
        None
    }

    /// Current state; an expired cool-down closes the breaker and reports
    /// the transition.
    pub fn check(&self) -> (BreakerState, Option<Transition>) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.opened_at {
            Some(at) if now.duration_since(at) >= COOLDOWN => {
                inner.opened_at = None;
                inner.samples.clear();
                (BreakerState::Closed, Some(Transition::Closed))
            }
            Some(_) => (BreakerState::Open, None),
            None => (BreakerState::Closed, None),
        }
    }

    /// Convenience: whether dispatch should fail fast right now.
    pub fn is_open(&self) -> bool {
        matches!(self.check().0, BreakerState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_at_half_failures_with_min_samples() {
        let breaker = CircuitBreaker::new();

        // 10 ok + 9 failures: still under the sample floor after pruning? No:
        // 19 samples < 20, no transition yet.
        for _ in 0..10 {
            assert_eq!(breaker.record(true), None);
        }
        for _ in 0..9 {
            assert_eq!(breaker.record(false), None);
        }
        // 20th sample tips the ratio to exactly 50%.
        assert_eq!(breaker.record(false), Some(Transition::Opened));
        assert!(breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..30 {
            assert_eq!(breaker.record(true), None);
        }
        for _ in 0..5 {
            assert_eq!(breaker.record(false), None);
        }
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_closes_the_breaker() {
        let breaker = CircuitBreaker::new();
        for _ in 0..10 {
            breaker.record(true);
        }
        for _ in 0..10 {
            breaker.record(false);
        }
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(31)).await;
        let (state, transition) = breaker.check();
        assert_eq!(state, BreakerState::Closed);
        assert_eq!(transition, Some(Transition::Closed));
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn old_samples_age_out_of_the_window() {
        let breaker = CircuitBreaker::new();
        for _ in 0..19 {
            breaker.record(false);
        }
        // Let the window empty out; the next failure alone must not open.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.record(false), None);
        assert!(!breaker.is_open());
    }
}
