use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Thresholds for tripping the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    /// Failures inside `window` needed to open.
    pub threshold: usize,
    /// Failures older than this are forgotten.
    pub window: Duration,
    /// The latest failure must be younger than this for the circuit to stay open.
    pub burst: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(90),
            burst: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Sliding window of failure instants. Every operation prunes and acts
/// under one lock so concurrent callers see a consistent window.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    policy: CircuitPolicy,
    failures: Mutex<VecDeque<Instant>>,
}

impl CircuitBreaker {
    pub fn new(policy: CircuitPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(&self, failures: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = failures.front() {
            if now.saturating_duration_since(*oldest) >= self.policy.window {
                failures.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn state_at(&self, now: Instant) -> CircuitState {
        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.prune(&mut failures, now);

        let recent_burst = failures
            .back()
            .is_some_and(|last| now.saturating_duration_since(*last) < self.policy.burst);
        if failures.len() >= self.policy.threshold && recent_burst {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.prune(&mut failures, now);
        failures.push_back(now);
        if failures.len() >= self.policy.threshold {
            warn!(failures = failures.len(), "completion circuit opened");
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().map(|f| f.len()).unwrap_or(0)
    }
}
