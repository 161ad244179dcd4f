//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::OrchestratorError;
use crate::server::handlers::{
    create_deployment_handler, get_deployment_handler, health_handler, list_deployments_handler,
    metrics_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the local HTTP surface
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(
            "/deployments",
            post(create_deployment_handler).get(list_deployments_handler),
        )
        .route("/deployments/{id}", get(get_deployment_handler))
        // Telemetry
        .route("/metrics", get(metrics_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    bind_address: &str,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let app = router(state);

    info!(address = %bind_address, "starting HTTP server");
    let listener = TcpListener::bind(bind_address).await?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(OrchestratorError::IoError)
    });

    Ok(handle)
}
