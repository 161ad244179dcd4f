//! In-process state store

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::models::DeploymentResult;
use crate::state::{LockRecord, LockStatus, LockType, StateStore};

struct LockEntry {
    record: LockRecord,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryStateStore {
    locks: Mutex<HashMap<(LockType, String), LockEntry>>,
    results: RwLock<HashMap<String, DeploymentResult>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently held, unexpired lock for `key`
    pub fn holder(&self, key: &str, lock_type: LockType) -> Option<LockRecord> {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(&(lock_type, key.to_string()))
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.record.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn acquire_lock(&self, key: &str, lock_type: LockType, ttl: Duration) -> LockStatus {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let slot = (lock_type, key.to_string());

        if let Some(entry) = locks.get(&slot) {
            if entry.expires_at > now {
                return LockStatus::AlreadyLocked;
            }
            debug!(key, lock_type = %lock_type, "taking over expired lock");
        }

        locks.insert(
            slot,
            LockEntry {
                record: LockRecord::new(key, lock_type, ttl),
                expires_at: now + ttl,
            },
        );
        LockStatus::Acquired
    }

    async fn release_lock(&self, key: &str, lock_type: LockType) -> Result<(), OrchestratorError> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&(lock_type, key.to_string()));
        Ok(())
    }

    async fn put_result(&self, result: &DeploymentResult) -> Result<(), OrchestratorError> {
        let mut results = self.results.write().unwrap_or_else(|e| e.into_inner());
        results.insert(result.deployment_id.clone(), result.clone());
        Ok(())
    }

    async fn get_result(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentResult>, OrchestratorError> {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        Ok(results.get(deployment_id).cloned())
    }

    async fn list_results(&self) -> Result<Vec<DeploymentResult>, OrchestratorError> {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = results.values().cloned().collect();
        all.sort_by_key(|r| r.start_time);
        Ok(all)
    }
}
