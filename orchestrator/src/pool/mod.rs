//! Connection pool of long-lived API clients, one sub-pool per API family

pub mod connection_pool;
pub mod handle;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

pub use connection_pool::{ConnectionPool, PoolStats};
pub use handle::PooledConnection;
pub use http::{ApiClient, HttpClientFactory};

/// Resource-API family a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFamily {
    Core,
    Apps,
    Networking,
    Rbac,
    Custom,
}

impl ApiFamily {
    pub const ALL: [ApiFamily; 5] = [
        ApiFamily::Core,
        ApiFamily::Apps,
        ApiFamily::Networking,
        ApiFamily::Rbac,
        ApiFamily::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::Core => "core",
            ApiFamily::Apps => "apps",
            ApiFamily::Networking => "networking",
            ApiFamily::Rbac => "rbac",
            ApiFamily::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds and probes the clients held by the pool
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;

    /// Open a new client for the family
    async fn create(&self, family: ApiFamily) -> Result<Self::Client, OrchestratorError>;

    /// Liveness probe; the pool bounds it with the validation timeout
    async fn validate(&self, family: ApiFamily, client: &Self::Client) -> bool;
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle handles kept per family even when past the idle timeout
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Hard cap on handles per family
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    #[serde(default = "default_true")]
    pub validate_on_borrow: bool,

    #[serde(default)]
    pub validate_on_return: bool,

    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,

    /// Extra attempts after a failed create
    #[serde(default = "default_create_retries")]
    pub create_retries: u32,

    /// Linear backoff unit between create attempts
    #[serde(default = "default_create_backoff_ms")]
    pub create_backoff_ms: u64,

    /// Handles reporting this many errors are discarded on release
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
}

fn default_min_connections() -> usize {
    1
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_validation_timeout_ms() -> u64 {
    2_000
}

fn default_create_retries() -> u32 {
    3
}

fn default_create_backoff_ms() -> u64 {
    200
}

fn default_max_errors() -> u32 {
    3
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            validate_on_borrow: true,
            validate_on_return: false,
            validation_timeout_ms: default_validation_timeout_ms(),
            create_retries: default_create_retries(),
            create_backoff_ms: default_create_backoff_ms(),
            max_errors: default_max_errors(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn create_backoff(&self) -> Duration {
        Duration::from_millis(self.create_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_connections == 0 {
            return Err(OrchestratorError::ConfigError(
                "pool max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(OrchestratorError::ConfigError(format!(
                "pool min_connections {} exceeds max_connections {}",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}
