//! Three-state circuit breaker guarding outbound pull-stream requests.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Closed: always allows. Open: allows only once `reset_timeout` has
    /// elapsed since the last failure, transitioning to HalfOpen as a side
    /// effect. HalfOpen: allows (a single probe is conceptually in flight).
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => true,
            State::HalfOpen => true,
            State::Open => {
                let elapsed_ok = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed_ok {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == State::HalfOpen {
            inner.state = State::Closed;
            inner.failure_count = 0;
        }
    }

    /// Returns `true` iff this call is the one that transitioned the
    /// breaker into `Open` (threshold crossed from `Closed`, or a probe
    /// failure from `HalfOpen`) — callers use this to count circuit trips
    /// without duplicating the state machine.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    inner.state = State::Open;
                    return true;
                }
                false
            }
            State::HalfOpen => {
                inner.state = State::Open;
                true
            }
            State::Open => false,
        }
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.inner.lock().state == State::Open
    }

    #[cfg(test)]
    fn is_half_open(&self) -> bool {
        self.inner.lock().state == State::HalfOpen
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn trips_open_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(100));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.is_open());
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_opens_after_reset_timeout_then_closes_on_success() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(100));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.allow_request());

        sleep(Duration::from_millis(110));
        assert!(cb.allow_request());
        assert!(cb.is_half_open());

        cb.record_success();
        assert!(cb.allow_request());
        assert!(!cb.is_open() && !cb.is_half_open());
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(50));
        cb.record_failure();
        assert!(cb.is_open());
        sleep(Duration::from_millis(60));
        assert!(cb.allow_request());
        assert!(cb.is_half_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn closed_state_allows_requests_freely() {
        let cb = CircuitBreaker::default();
        for _ in 0..10 {
            assert!(cb.allow_request());
        }
    }
}
