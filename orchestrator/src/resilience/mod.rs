//! Circuit breaking and retries around collaborator calls

pub mod circuit_breaker;
pub mod retry;

use std::collections::HashMap;
use std::future::Future;

use crate::errors::OrchestratorError;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use retry::{RetryConfig, RetryPolicy};

/// Retry wrapped around a per-environment circuit breaker
#[derive(Debug)]
pub struct Resilience {
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
    retry_overrides: HashMap<String, RetryPolicy>,
}

impl Resilience {
    pub fn new(breaker: CircuitBreakerConfig, retry: RetryConfig) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(breaker),
            retry: RetryPolicy::new(retry),
            retry_overrides: HashMap::new(),
        }
    }

    /// Environment-specific thresholds; `None` keeps the defaults
    pub fn with_environment(
        mut self,
        environment: &str,
        breaker: Option<CircuitBreakerConfig>,
        retry: Option<RetryConfig>,
    ) -> Self {
        if let Some(breaker) = breaker {
            self.breakers = self.breakers.with_override(environment, breaker);
        }
        if let Some(retry) = retry {
            self.retry_overrides
                .insert(environment.to_string(), RetryPolicy::new(retry));
        }
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    fn retry_for(&self, environment: &str) -> &RetryPolicy {
        self.retry_overrides.get(environment).unwrap_or(&self.retry)
    }

    /// Run `op` for `environment` with retries, each attempt through the
    /// operation's breaker
    pub async fn call<T, F, Fut>(
        &self,
        environment: &str,
        operation: &str,
        mut op: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let breaker = self.breakers.get_or_create(environment, operation);
        self.retry_for(environment)
            .run(operation, || {
                let attempt = op();
                breaker.execute(move || attempt)
            })
            .await
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), RetryConfig::default())
    }
}
