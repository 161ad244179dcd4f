//! Application configuration options

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::deploy::scoring::ScoringConfig;
use crate::pool::{ApiFamily, PoolConfig};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{EnvironmentOverrides, Settings, StateBackend};
use crate::workers::reaper;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    pub state_backend: StateBackend,

    /// Enable local HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Collaborator endpoints; empty runs against no-op collaborators
    pub endpoints: BTreeMap<ApiFamily, Url>,

    pub api_token: Option<SecretString>,

    pub request_timeout: Duration,

    pub pool: PoolConfig,

    /// Reaper worker options
    pub reaper: reaper::Options,

    pub circuit_breaker: CircuitBreakerConfig,

    pub retry: RetryConfig,

    pub scoring: ScoringConfig,

    pub environments: BTreeMap<String, EnvironmentOverrides>,

    pub lock_ttl: Duration,

    pub result_index_capacity: usize,

    /// Environment probed by `/health` when none is given
    pub default_environment: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                drain_timeout: settings.shutdown_timeout(),
                max_shutdown_delay: settings.shutdown_timeout() + Duration::from_secs(30),
            },
            layout,
            state_backend: settings.state_backend,
            enable_server: settings.server.enabled,
            server: ServerOptions {
                bind_address: settings.server.bind_address.clone(),
            },
            endpoints: settings.endpoints.clone(),
            api_token: settings.api_token.clone(),
            request_timeout: settings.request_timeout(),
            pool: settings.pool.clone(),
            reaper: reaper::Options {
                interval: settings.pool.reap_interval(),
            },
            circuit_breaker: settings.circuit_breaker.clone(),
            retry: settings.retry.clone(),
            scoring: settings.scoring.clone(),
            environments: settings.environments.clone(),
            lock_ttl: settings.lock_ttl(),
            result_index_capacity: settings.result_index_capacity,
            default_environment: "production".to_string(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long in-flight deployments may drain at shutdown
    pub drain_timeout: Duration,

    /// Maximum delay for graceful shutdown, drain included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// `host:port` to bind to
    pub bind_address: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8610".to_string(),
        }
    }
}
