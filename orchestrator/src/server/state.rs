//! Server state

use std::sync::Arc;

use crate::deploy::Orchestrator;
use crate::pool::{ConnectionPool, HttpClientFactory};

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    /// Present when collaborators are reached over REST
    pub pool: Option<Arc<ConnectionPool<HttpClientFactory>>>,
    /// Environment probed by `/health` when the caller names none
    pub default_environment: String,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        pool: Option<Arc<ConnectionPool<HttpClientFactory>>>,
        default_environment: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            pool,
            default_environment: default_environment.into(),
        }
    }
}
