use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use wayfarer_core::Clock;

#[derive(Debug, Clone, Copy)]
struct Outcome {
    success: bool,
    duration_ms: u64,
    at_unix: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_secs: i64,
    pub history_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_secs: 300,
            history_size: 20,
        }
    }
}

struct ServiceState {
    history: VecDeque<Outcome>,
    consecutive_failures: u32,
    open_until_unix: Option<i64>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            consecutive_failures: 0,
            open_until_unix: None,
        }
    }
}

/// Snapshot of a single service's breaker state, for introspection/metrics.
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    pub available: bool,
    pub consecutive_failures: u32,
    pub open_until_unix: Option<i64>,
    pub history_len: usize,
}

/// Per-service failure tracker. After `failure_threshold`
/// consecutive failures the service opens for `open_duration_secs`; calls
/// made while open are short-circuited by [`is_available`] rather than
/// attempted.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<HashMap<String, ServiceState>>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, CircuitBreakerConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, service: &str, success: bool, duration_ms: u64) {
        let now = self.clock.now_unix();
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(service.to_string()).or_insert_with(ServiceState::new);

        entry.history.push_back(Outcome {
            success,
            duration_ms,
            at_unix: now,
        });
        while entry.history.len() > self.config.history_size {
            entry.history.pop_front();
        }

        if success {
            entry.consecutive_failures = 0;
            entry.open_until_unix = None;
        } else {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= self.config.failure_threshold {
                entry.open_until_unix = Some(now + self.config.open_duration_secs);
            }
        }
    }

    /// True if the service may be called right now: either it has never
    /// tripped, or its open window has elapsed.
    pub fn is_available(&self, service: &str) -> bool {
        let now = self.clock.now_unix();
        let state = self.state.lock().unwrap();
        match state.get(service) {
            None => true,
            Some(entry) => match entry.open_until_unix {
                Some(until) => now >= until,
                None => true,
            },
        }
    }

    pub fn reset(&self, service: &str) {
        self.state.lock().unwrap().remove(service);
    }

    pub fn snapshot(&self, service: &str) -> CircuitStatus {
        let state = self.state.lock().unwrap();
        match state.get(service) {
            None => CircuitStatus {
                available: true,
                consecutive_failures: 0,
                open_until_unix: None,
                history_len: 0,
            },
            Some(entry) => CircuitStatus {
                available: entry
                    .open_until_unix
                    .map(|until| self.clock.now_unix() >= until)
                    .unwrap_or(true),
                consecutive_failures: entry.consecutive_failures,
                open_until_unix: entry.open_until_unix,
                history_len: entry.history.len(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::FakeClock;

    #[test]
    fn available_by_default_for_unknown_service() {
        let clock = Arc::new(FakeClock::new(0));
        let breaker = CircuitBreaker::new(clock);
        assert!(breaker.is_available("llm"));
    }

    #[test]
    fn trips_open_after_consecutive_failures_reach_threshold() {
        let clock = Arc::new(FakeClock::new(0));
        let breaker = CircuitBreaker::with_config(
            clock,
            CircuitBreakerConfig {
                failure_threshold: 3,
                open_duration_secs: 300,
                history_size: 20,
            },
        );
        breaker.record("llm", false, 10);
        breaker.record("llm", false, 10);
        assert!(breaker.is_available("llm"));
        breaker.record("llm", false, 10);
        assert!(!breaker.is_available("llm"));
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let clock = Arc::new(FakeClock::new(0));
        let breaker = CircuitBreaker::new(clock);
        breaker.record("llm", false, 10);
        breaker.record("llm", false, 10);
        breaker.record("llm", true, 10);
        breaker.record("llm", false, 10);
        breaker.record("llm", false, 10);
        assert!(breaker.is_available("llm"));
    }

    #[test]
    fn becomes_available_again_once_open_duration_elapses() {
        let clock = Arc::new(FakeClock::new(0));
        let breaker = CircuitBreaker::with_config(
            Arc::clone(&clock) as Arc<dyn Clock>,
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration_secs: 300,
                history_size: 20,
            },
        );
        breaker.record("llm", false, 10);
        assert!(!breaker.is_available("llm"));
        clock.advance(300);
        assert!(breaker.is_available("llm"));
    }

    #[test]
    fn history_is_bounded_by_history_size() {
        let clock = Arc::new(FakeClock::new(0));
        let breaker = CircuitBreaker::with_config(
            clock,
            CircuitBreakerConfig {
                failure_threshold: 100,
                open_duration_secs: 300,
                history_size: 3,
            },
        );
        for _ in 0..10 {
            breaker.record("llm", true, 1);
        }
        assert_eq!(breaker.snapshot("llm").history_len, 3);
    }

    #[test]
    fn reset_clears_tracked_state() {
        let clock = Arc::new(FakeClock::new(0));
        let breaker = CircuitBreaker::with_config(
            clock,
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration_secs: 300,
                history_size: 20,
            },
        );
        breaker.record("llm", false, 10);
        assert!(!breaker.is_available("llm"));
        breaker.reset("llm");
        assert!(breaker.is_available("llm"));
    }
}
