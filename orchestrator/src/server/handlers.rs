//! HTTP request handlers

use std::sync::Arc;

use api_models::{ErrorResponse, HealthStatus, VersionResponse};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::deploy::HealthReport;
use crate::errors::OrchestratorError;
use crate::models::{DeploymentRequest, DeploymentResult};
use crate::pool::PoolStats;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error returned by handlers
#[derive(Debug)]
pub enum ApiError {
    Orchestrator(OrchestratorError),
    NotFound(String),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

/// HTTP status for an orchestrator error
pub fn status_code(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::LockContention(_) => StatusCode::CONFLICT,
        OrchestratorError::ComplianceBlocked { .. } | OrchestratorError::CanaryAborted { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OrchestratorError::Collaborator { .. } | OrchestratorError::HttpError(_) => {
            StatusCode::BAD_GATEWAY
        }
        OrchestratorError::CircuitOpen { .. }
        | OrchestratorError::AcquireTimeout { .. }
        | OrchestratorError::Shutdown(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Orchestrator(err) => (
                status_code(&err),
                ErrorResponse {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                },
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    kind: "not_found".to_string(),
                    message,
                    retryable: false,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub environment: Option<String>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<PoolStats>,
}

/// Health check handler. Unhealthy answers with 503.
pub async fn health_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HealthQuery>,
) -> impl IntoResponse {
    let environment = query
        .environment
        .unwrap_or_else(|| state.default_environment.clone());
    let report = state.orchestrator.system_health(&environment).await;
    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let pools = state.pool.as_ref().map(|p| p.stats()).unwrap_or_default();

    (
        code,
        Json(HealthResponse {
            report,
            version: version_info().version,
            pools,
        }),
    )
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct DeployQuery {
    /// Hold the response until the run finishes
    #[serde(default)]
    pub wait: bool,
}

/// Answer to an accepted, not awaited, deployment
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub deployment_id: String,
    pub status: String,
}

/// Start a deployment
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeployQuery>,
    Json(request): Json<DeploymentRequest>,
) -> Result<Response, ApiError> {
    let deployment_id = request.id.clone();
    info!(deployment_id = %deployment_id, wait = query.wait, "deployment requested");

    // the run lives on its own task so a disconnecting client cannot cut it short
    let handle = state.orchestrator.submit(request).await?;

    if query.wait {
        let result = handle
            .await
            .map_err(|e| OrchestratorError::Internal(format!("deployment task failed: {e}")))??;
        return Ok((StatusCode::OK, Json(result)).into_response());
    }

    let id = deployment_id.clone();
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(result)) => info!(deployment_id = %id, status = %result.status, "deployment run ended"),
            Ok(Err(e)) => error!(deployment_id = %id, error = %e, "deployment run failed"),
            Err(e) => error!(deployment_id = %id, error = %e, "deployment task panicked"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            deployment_id,
            status: "in_progress".to_string(),
        }),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Include persisted results not in the in-memory index
    #[serde(default)]
    pub all: bool,
}

/// Deployments response
#[derive(Debug, Serialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentResult>,
    pub total: usize,
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeploymentsResponse>, ApiError> {
    let deployments = if query.all {
        state.orchestrator.list_all().await?
    } else {
        state.orchestrator.list_active()
    };
    let total = deployments.len();
    Ok(Json(DeploymentsResponse { deployments, total }))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentResult>, ApiError> {
    state
        .orchestrator
        .get_status(&deployment_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("deployment {} not found", deployment_id)))
}

/// Orchestrator counters
pub async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.metrics().snapshot())
}
