//! Settings file management

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::deploy::scoring::ScoringConfig;
use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::pool::{ApiFamily, PoolConfig};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Orchestrator settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON log lines instead of plain text
    #[serde(default)]
    pub json_logs: bool,

    /// Local HTTP surface
    #[serde(default)]
    pub server: ServerSettings,

    /// Where locks and results are kept
    #[serde(default)]
    pub state_backend: StateBackend,

    /// Base URL of each collaborator API family
    #[serde(default)]
    pub endpoints: BTreeMap<ApiFamily, Url>,

    /// Bearer token presented to collaborators
    #[serde(default)]
    pub api_token: Option<SecretString>,

    /// Per-request timeout of the HTTP client
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Lifetime of deployment and rollback locks
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Upper bound on draining in-flight runs at shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Number of results kept in the in-memory index
    #[serde(default = "default_result_index_capacity")]
    pub result_index_capacity: usize,

    /// Per-environment overrides, keyed by environment name
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentOverrides>,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_lock_ttl() -> u64 {
    1800
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_result_index_capacity() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            server: ServerSettings::default(),
            state_backend: StateBackend::default(),
            endpoints: BTreeMap::new(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
            pool: PoolConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            scoring: ScoringConfig::default(),
            lock_ttl_secs: default_lock_ttl(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            result_index_capacity: default_result_index_capacity(),
            environments: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Read and validate a settings file
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        self.pool.validate()?;
        if self.lock_ttl_secs == 0 {
            return Err(OrchestratorError::ConfigError(
                "lock_ttl_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.scoring.compliance_threshold) {
            return Err(OrchestratorError::ConfigError(format!(
                "compliance threshold {} outside 0-100",
                self.scoring.compliance_threshold
            )));
        }
        self.check_call_timeout("circuit_breaker", &self.circuit_breaker)?;
        for (environment, overrides) in &self.environments {
            if let Some(breaker) = &overrides.circuit_breaker {
                self.check_call_timeout(environment, breaker)?;
            }
            if let Some(threshold) = overrides.compliance_threshold {
                if !(0.0..=100.0).contains(&threshold) {
                    return Err(OrchestratorError::ConfigError(format!(
                        "{}: compliance threshold {} outside 0-100",
                        environment, threshold
                    )));
                }
            }
        }
        Ok(())
    }

    /// A breaker call wraps pool acquisition, borrow validation and the HTTP
    /// request, so its timeout must outlast all three
    fn check_call_timeout(
        &self,
        label: &str,
        breaker: &CircuitBreakerConfig,
    ) -> Result<(), OrchestratorError> {
        let inner = self.pool.acquire_timeout()
            + self.pool.validation_timeout()
            + self.request_timeout();
        if breaker.call_timeout() <= inner {
            return Err(OrchestratorError::ConfigError(format!(
                "{}: call_timeout_ms {} must exceed acquire, validation and request timeouts ({} ms)",
                label,
                breaker.call_timeout_ms,
                inner.as_millis()
            )));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1:8610".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    Memory,
    #[default]
    File,
}

/// Settings that differ per target environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentOverrides {
    #[serde(default)]
    pub compliance_threshold: Option<f64>,

    #[serde(default)]
    pub lock_ttl_secs: Option<u64>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,
}
