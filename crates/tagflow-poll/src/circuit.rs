use std::time::{Duration, Instant};

use parking_lot::Mutex;

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(30);

struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Per-`ConnectionPoller` circuit breaker. Five consecutive failed reads open the circuit for
/// 30s; while open, timer callbacks are expected to skip the read entirely. A single success
/// resets the counter and closes the circuit.
pub struct CircuitBreaker {
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { consecutive_failures: 0, open_until: None }) }
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        matches!(state.open_until, Some(until) if Instant::now() < until)
    }

    /// Returns `true` if this success transitioned the circuit from open to closed, which the
    /// caller uses to decide whether to publish a `Connected` status message.
    pub fn record_success(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = state.open_until.is_some();
        state.consecutive_failures = 0;
        state.open_until = None;
        was_open
    }

    /// Returns `true` if this failure transitioned the circuit from closed to open, which the
    /// caller uses to decide whether to publish an `Error` status message.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = state.open_until.is_some();
        state.consecutive_failures += 1;
        if !was_open && state.consecutive_failures >= FAILURE_THRESHOLD {
            state.open_until = Some(Instant::now() + OPEN_DURATION);
            return true;
        }
        false
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record_failure();
            assert!(!breaker.is_open());
        }
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_and_reports_transition() {
        let breaker = CircuitBreaker::new();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        assert!(breaker.record_success());
        assert!(!breaker.is_open());
        assert!(!breaker.record_success());
    }
}
