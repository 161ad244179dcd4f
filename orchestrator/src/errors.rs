//! Error types for the deployment orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Deployment {0} is locked by another run")]
    LockContention(String),

    #[error("{collaborator} call failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    #[error("Compliance blocked: score {score:.1} is below threshold {threshold:.1}")]
    ComplianceBlocked { score: f64, threshold: f64 },

    #[error("Circuit open for operation {operation}")]
    CircuitOpen { operation: String },

    #[error("Timed out acquiring a connection for API family {family}")]
    AcquireTimeout { family: String },

    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Canary aborted at weight {weight}: {reason}")]
    CanaryAborted { weight: u8, reason: String },

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Create a collaborator failure
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Whether the retry policy may attempt the failed call again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Collaborator { .. }
                | OrchestratorError::AcquireTimeout { .. }
                | OrchestratorError::StateStore(_)
                | OrchestratorError::IoError(_)
                | OrchestratorError::HttpError(_)
        )
    }

    /// Stable machine-readable kind used in API error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_failure",
            OrchestratorError::LockContention(_) => "lock_contention",
            OrchestratorError::Collaborator { .. } => "collaborator_failure",
            OrchestratorError::ComplianceBlocked { .. } => "compliance_blocked",
            OrchestratorError::CircuitOpen { .. } => "circuit_open",
            OrchestratorError::AcquireTimeout { .. } => "acquire_timeout",
            OrchestratorError::Rollback(_) => "rollback_failure",
            OrchestratorError::CanaryAborted { .. } => "canary_aborted",
            OrchestratorError::StateStore(_) => "state_store",
            OrchestratorError::Shutdown(_) => "shutdown",
            OrchestratorError::IoError(_) => "io",
            OrchestratorError::JsonError(_) => "json",
            OrchestratorError::HttpError(_) => "http",
            OrchestratorError::ConfigError(_) => "config",
            OrchestratorError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
