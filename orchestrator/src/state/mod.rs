//! Distributed lock and result store

pub mod file;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::models::DeploymentResult;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Deployment,
    Rollback,
    Maintenance,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Deployment => "deployment",
            LockType::Rollback => "rollback",
            LockType::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a lock attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    AlreadyLocked,
    Error(String),
}

/// A held lock as persisted by the stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    pub lock_type: LockType,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(key: &str, lock_type: LockType, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.to_string(),
            lock_type,
            holder: crate::utils::generate_uuid(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Lock and result persistence shared by every run
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomic test-and-set of `(key, lock_type)` with a TTL
    async fn acquire_lock(&self, key: &str, lock_type: LockType, ttl: Duration) -> LockStatus;

    /// Idempotent
    async fn release_lock(&self, key: &str, lock_type: LockType) -> Result<(), OrchestratorError>;

    async fn put_result(&self, result: &DeploymentResult) -> Result<(), OrchestratorError>;

    async fn get_result(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentResult>, OrchestratorError>;

    async fn list_results(&self) -> Result<Vec<DeploymentResult>, OrchestratorError>;
}
