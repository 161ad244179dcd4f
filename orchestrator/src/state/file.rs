//! File-backed state store
//!
//! A lock is a file holding a [`LockRecord`], published with a hard link so it
//! either appears complete or not at all. Clearing an expired lock happens
//! under a companion `.reap` file: whoever holds it re-reads the lock before
//! deleting it, so a fresh lock is never removed. Results are JSON files
//! written through a rename.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::DeploymentResult;
use crate::state::{LockRecord, LockStatus, LockType, StateStore};
use crate::storage::layout::StorageLayout;

/// A `.reap` file older than this belongs to a reaper that died
const REAP_GRACE: Duration = Duration::from_secs(30);

pub struct FileStateStore {
    locks_dir: Dir,
    results_dir: Dir,
}

impl FileStateStore {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            locks_dir: layout.locks_dir(),
            results_dir: layout.results_dir(),
        }
    }

    fn lock_file(&self, key: &str, lock_type: LockType) -> File {
        self.locks_dir
            .file(&format!("{}-{}.lock", lock_type, encode_key(key)))
    }

    fn result_file(&self, deployment_id: &str) -> File {
        self.results_dir
            .file(&format!("{}.json", encode_key(deployment_id)))
    }

    /// Whether the lock at `file` may be taken over. A record that cannot be
    /// parsed counts as held until it is older than `ttl`.
    async fn is_stale(&self, file: &File, ttl: Duration) -> Result<bool, OrchestratorError> {
        match file.read_json::<LockRecord>().await {
            Ok(record) => Ok(record.is_expired()),
            Err(OrchestratorError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(true)
            }
            Err(OrchestratorError::JsonError(_)) => Ok(file.age().await? >= ttl),
            Err(e) => Err(e),
        }
    }

    /// Delete the lock at `file` if it is stale. Returns whether the caller
    /// should try to create the lock again.
    async fn reap_if_stale(&self, file: &File, ttl: Duration) -> Result<bool, OrchestratorError> {
        if !self.is_stale(file, ttl).await? {
            return Ok(false);
        }

        let reaper = File::new(file.path().with_extension("reap"));
        match reaper
            .create_new_json(&json!({ "pid": std::process::id() }))
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if reaper.age().await.is_ok_and(|age| age >= REAP_GRACE) {
                    warn!(path = %reaper.path().display(), "removing abandoned reap marker");
                    reaper.delete().await?;
                }
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        // only reap holders delete lock files, so the record cannot change
        // between this read and the delete
        let reaped = match self.is_stale(file, ttl).await {
            Ok(true) => {
                debug!(path = %file.path().display(), "removing stale lock file");
                file.delete().await.map(|()| true)
            }
            other => other,
        };
        reaper.delete().await?;
        reaped
    }
}

/// Map an id to a file name stem, one to one: ASCII letters, digits, `-`
/// and `_` stay, every other byte becomes `%XX`
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{:02X}", byte);
        }
    }
    encoded
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn acquire_lock(&self, key: &str, lock_type: LockType, ttl: Duration) -> LockStatus {
        let file = self.lock_file(key, lock_type);

        for _ in 0..3 {
            let record = LockRecord::new(key, lock_type, ttl);
            match file.create_new_json(&record).await {
                Ok(()) => return LockStatus::Acquired,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match self.reap_if_stale(&file, ttl).await {
                        Ok(true) => continue,
                        Ok(false) => return LockStatus::AlreadyLocked,
                        Err(e) => return LockStatus::Error(e.to_string()),
                    }
                }
                Err(e) => {
                    warn!(key, error = %e, "failed to create lock file");
                    return LockStatus::Error(e.to_string());
                }
            }
        }
        LockStatus::AlreadyLocked
    }

    async fn release_lock(&self, key: &str, lock_type: LockType) -> Result<(), OrchestratorError> {
        self.lock_file(key, lock_type)
            .delete()
            .await
            .map_err(|e| OrchestratorError::StateStore(e.to_string()))
    }

    async fn put_result(&self, result: &DeploymentResult) -> Result<(), OrchestratorError> {
        self.result_file(&result.deployment_id)
            .write_json_atomic(result)
            .await
            .map_err(|e| OrchestratorError::StateStore(e.to_string()))
    }

    async fn get_result(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentResult>, OrchestratorError> {
        let file = self.result_file(deployment_id);
        if !file.exists().await {
            return Ok(None);
        }
        file.read_json()
            .await
            .map(Some)
            .map_err(|e| OrchestratorError::StateStore(e.to_string()))
    }

    async fn list_results(&self) -> Result<Vec<DeploymentResult>, OrchestratorError> {
        let mut results = Vec::new();
        for path in self.results_dir.list_files("json").await? {
            match File::new(&path).read_json::<DeploymentResult>().await {
                Ok(result) => results.push(result),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable result"),
            }
        }
        results.sort_by_key(|r| r.start_time);
        Ok(results)
    }
}
