use crate::config::{LlmConfig, ResilienceConfig};
use crate::error::{BackendError, LlmError};
use crate::llm::backend::{CompletionBackend, CompletionRequest, STOP_SEQUENCES};
use crate::llm::circuit::{CircuitBreaker, CircuitPolicy, CircuitState};
use std::time::Duration;
use tracing::{debug, warn};

pub type TextStream = Box<dyn Iterator<Item = Result<String, LlmError>> + Send>;

/// What the planner and the documentation lookup need from a model.
pub trait Completion: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Retries transient backend failures and stops calling a backend that
/// keeps failing.
pub struct ResilientClient<B> {
    backend: B,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    circuit: CircuitBreaker,
}

impl<B: CompletionBackend> ResilientClient<B> {
    pub fn new(backend: B, retry: RetryPolicy, circuit: CircuitPolicy) -> Self {
        Self {
            backend,
            temperature: 0.1,
            max_tokens: 1536,
            retry,
            circuit: CircuitBreaker::new(circuit),
        }
    }

    pub fn from_config(backend: B, llm: &LlmConfig, resilience: &ResilienceConfig) -> Self {
        let mut client = Self::new(backend, resilience.retry_policy(), resilience.circuit_policy());
        client.temperature = llm.temperature;
        client.max_tokens = llm.max_tokens;
        client
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    fn request(&self, system: &str, user: &str) -> CompletionRequest {
        CompletionRequest {
            system: system.to_string(),
            user: user.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Runs `call` under the breaker and the retry budget. A call that
    /// ends in failure is recorded once, whatever its category.
    fn guarded<T>(&self, mut call: impl FnMut() -> Result<T, BackendError>) -> Result<T, LlmError> {
        let mut attempt = 0;
        loop {
            if self.circuit.state() == CircuitState::Open {
                warn!("completion rejected: circuit open");
                return Err(LlmError::CircuitOpen);
            }
            attempt += 1;
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let wait = self.retry.backoff(attempt);
                    warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying completion");
                    std::thread::sleep(wait);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "completion failed");
                    self.circuit.record_failure();
                    return Err(err.into());
                }
            }
        }
    }

    /// Whole-response completion.
    pub fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = self.request(system, user);
        let text = self.guarded(|| self.backend.complete(&request))?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    /// Incremental completion. Only opening the stream is retried; errors
    /// after the first fragment reach the consumer as they are.
    pub fn stream(&self, system: &str, user: &str) -> Result<TextStream, LlmError> {
        let request = self.request(system, user);
        let fragments = self.guarded(|| self.backend.stream(&request))?;
        Ok(Box::new(fragments.map(|f| f.map_err(LlmError::from))))
    }
}

impl<B: CompletionBackend> Completion for ResilientClient<B> {
    fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        ResilientClient::complete(self, system, user)
    }
}
