//! Deployment result index

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::DeploymentResult;

/// Bounded in-memory index of recent deployment results. Advisory only: the
/// state store holds the durable copy.
pub struct ResultIndex {
    entries: RwLock<HashMap<String, DeploymentResult>>,
    capacity: usize,
}

impl ResultIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, deployment_id: &str) -> Option<DeploymentResult> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(deployment_id).cloned()
    }

    /// Insert or replace a snapshot. At capacity the oldest finished entry is
    /// evicted; running deployments are never evicted.
    pub fn upsert(&self, result: DeploymentResult) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(&result.deployment_id) && entries.len() >= self.capacity {
            if let Some(oldest_id) = entries
                .values()
                .filter(|r| r.status.is_terminal())
                .min_by_key(|r| r.end_time.unwrap_or(r.start_time))
                .map(|r| r.deployment_id.clone())
            {
                entries.remove(&oldest_id);
            }
        }

        entries.insert(result.deployment_id.clone(), result);
    }

    /// All indexed results, oldest first
    pub fn list(&self) -> Vec<DeploymentResult> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut results: Vec<_> = entries.values().cloned().collect();
        results.sort_by_key(|r| r.start_time);
        results
    }

    /// Number of runs still in progress
    pub fn in_progress(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|r| !r.status.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
