//! Application state management

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::collaborators::{Capabilities, NoopPlatform, RestGateway};
use crate::deploy::{Orchestrator, OrchestratorConfig};
use crate::errors::OrchestratorError;
use crate::pool::{ConnectionPool, HttpClientFactory};
use crate::resilience::Resilience;
use crate::state::{FileStateStore, MemoryStateStore, StateStore};
use crate::storage::settings::StateBackend;

/// Main application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    /// Present when collaborators are reached over REST
    pub pool: Option<Arc<ConnectionPool<HttpClientFactory>>>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, OrchestratorError> {
        info!("initializing application state");

        let store: Arc<dyn StateStore> = match options.state_backend {
            StateBackend::Memory => Arc::new(MemoryStateStore::new()),
            StateBackend::File => {
                options.layout.setup().await?;
                Arc::new(FileStateStore::new(&options.layout))
            }
        };

        let (capabilities, pool) = if options.endpoints.is_empty() {
            warn!("no collaborator endpoints configured, deployments run dry");
            (Capabilities::new(Arc::new(NoopPlatform)), None)
        } else {
            options.pool.validate()?;
            let endpoints: HashMap<_, _> = options
                .endpoints
                .iter()
                .map(|(family, url)| (*family, url.clone()))
                .collect();
            let factory = HttpClientFactory::new(endpoints, options.request_timeout)
                .with_token(options.api_token.clone());
            let pool = Arc::new(ConnectionPool::new(factory, options.pool.clone()));
            for family in options.endpoints.keys() {
                if let Err(e) = pool.warm_up(*family).await {
                    warn!(family = %family, error = %e, "pool warm-up failed");
                }
            }
            let gateway = Arc::new(RestGateway::new(pool.clone()));
            (Capabilities::from_gateway(gateway), Some(pool))
        };
        info!(subsystems = ?capabilities.describe(), "collaborators configured");

        let mut resilience = Resilience::new(options.circuit_breaker.clone(), options.retry.clone());
        for (environment, overrides) in &options.environments {
            resilience = resilience.with_environment(
                environment,
                overrides.circuit_breaker.clone(),
                overrides.retry.clone(),
            );
        }

        let orchestrator = Orchestrator::new(
            capabilities,
            store,
            resilience,
            OrchestratorConfig {
                lock_ttl: options.lock_ttl,
                scoring: options.scoring.clone(),
                environments: options.environments.clone(),
                index_capacity: options.result_index_capacity,
                metrics_file: Some(options.layout.metrics_file()),
            },
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            pool,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self, options: &AppOptions) {
        info!("shutting down application state");
        let snapshot = self
            .orchestrator
            .shutdown(options.lifecycle.drain_timeout)
            .await;
        info!(targets = snapshot.targets.len(), "final metrics written");
    }
}
