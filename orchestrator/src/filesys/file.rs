//! File operations

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::OrchestratorError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, OrchestratorError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OrchestratorError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write JSON through a temporary file and a rename
    pub async fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), OrchestratorError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Atomic write using a temporary file
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), OrchestratorError> {
        self.create_parent().await?;
        let temp_path = self.temp_path();
        write_synced(&temp_path, contents).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Publish JSON contents only if nothing is at the path yet, failing with
    /// `ErrorKind::AlreadyExists` otherwise. The contents are written to a
    /// temporary file and hard-linked into place, so a reader never sees a
    /// partially written file.
    pub async fn create_new_json<T: Serialize>(&self, value: &T) -> std::io::Result<()> {
        self.create_parent().await?;
        let contents = serde_json::to_vec(value)?;
        let temp_path = self.temp_path();
        let published = match write_synced(&temp_path, &contents).await {
            Ok(()) => fs::hard_link(&temp_path, &self.path).await,
            Err(e) => Err(e),
        };
        let _ = fs::remove_file(&temp_path).await;
        published
    }

    /// Time since the last modification
    pub async fn age(&self) -> Result<Duration, OrchestratorError> {
        let modified = fs::metadata(&self.path).await?.modified()?;
        Ok(modified.elapsed().unwrap_or_default())
    }

    async fn create_parent(&self) -> std::io::Result<()> {
        match self.path.parent() {
            Some(parent) => fs::create_dir_all(parent).await,
            None => Ok(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()))
    }

    /// Delete the file; a missing file is not an error
    pub async fn delete(&self) -> Result<(), OrchestratorError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
