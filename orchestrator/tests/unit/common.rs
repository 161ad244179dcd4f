//! In-memory collaborators that record what the orchestrator asked of them

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_models::HealthStatus;
use async_trait::async_trait;
use fabrollout::collaborators::{
    AuditEvent, Capabilities, ComplianceHealth, ComplianceManager, ComplianceReport, MeshStatus,
    PlatformAdapter, PlatformDeployConfig, PlatformDeployOutcome, PlatformHealth,
    PlatformRollbackOutcome, ReplicaCounts, ServiceMeshEntry, ServiceMeshManager, SubsetMetrics,
    TrafficSplit, WorkloadState, CANARY_SUBSET,
};
use fabrollout::deploy::{Orchestrator, OrchestratorConfig};
use fabrollout::errors::OrchestratorError;
use fabrollout::models::{DeploymentConfig, DeploymentRequest, DeploymentResult, Strategy};
use fabrollout::resilience::{CircuitBreakerConfig, Resilience, RetryConfig};
use fabrollout::state::{LockStatus, LockType, MemoryStateStore, StateStore};

pub fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ================================= PLATFORM ===================================== //

#[derive(Default)]
pub struct RecordingPlatform {
    pub deploys: Mutex<Vec<PlatformDeployConfig>>,
    pub rollbacks: AtomicUsize,
    pub deploy_delay: Option<Duration>,
    pub unhealthy: bool,
}

impl RecordingPlatform {
    pub fn slow(delay: Duration) -> Self {
        Self {
            deploy_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn deploy_count(&self) -> usize {
        lock(&self.deploys).len()
    }
}

#[async_trait]
impl PlatformAdapter for RecordingPlatform {
    async fn deploy(
        &self,
        config: &PlatformDeployConfig,
    ) -> Result<PlatformDeployOutcome, OrchestratorError> {
        if let Some(delay) = self.deploy_delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.deploys).push(config.clone());
        Ok(PlatformDeployOutcome {
            cluster: format!("{}-cluster", config.region),
            status: WorkloadState::Deployed,
            replicas: ReplicaCounts {
                desired: config.replicas,
                ready: config.replicas,
            },
            pods: Vec::new(),
            health_checks: Vec::new(),
        })
    }

    async fn rollback(
        &self,
        _name: &str,
        _namespace: &str,
    ) -> Result<PlatformRollbackOutcome, OrchestratorError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(PlatformRollbackOutcome {
            restored_version: Some("1.0.0".to_string()),
        })
    }

    async fn get_health_status(&self) -> Result<PlatformHealth, OrchestratorError> {
        Ok(PlatformHealth {
            status: if self.unhealthy {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            },
            services: vec!["analytics-svc".to_string()],
            pods: Vec::new(),
            message: None,
        })
    }
}

// ================================= MESH ========================================= //

/// Mesh reporting canary metrics that turn bad once the canary weight
/// reaches `breach_at`
pub struct ScriptedMesh {
    pub splits: Mutex<Vec<TrafficSplit>>,
    pub breach_at: Option<u8>,
    /// Report no subset metrics at all
    pub silent: bool,
}

impl ScriptedMesh {
    pub fn healthy() -> Self {
        Self {
            splits: Mutex::new(Vec::new()),
            breach_at: None,
            silent: false,
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::healthy()
        }
    }

    pub fn breaching_at(weight: u8) -> Self {
        Self {
            splits: Mutex::new(Vec::new()),
            breach_at: Some(weight),
            silent: false,
        }
    }

    pub fn canary_weights(&self) -> Vec<u8> {
        lock(&self.splits)
            .iter()
            .filter_map(|split| split.weight_of(CANARY_SUBSET))
            .collect()
    }
}

#[async_trait]
impl ServiceMeshManager for ScriptedMesh {
    async fn configure_traffic_splitting(
        &self,
        split: &TrafficSplit,
    ) -> Result<(), OrchestratorError> {
        lock(&self.splits).push(split.clone());
        Ok(())
    }

    async fn get_service_mesh_status(&self) -> Result<MeshStatus, OrchestratorError> {
        let splits = lock(&self.splits);
        let last = splits.last().filter(|_| !self.silent);
        let Some(last) = last else {
            return Ok(MeshStatus {
                status: HealthStatus::Healthy,
                services: Vec::new(),
                message: None,
            });
        };
        let weight = last.weight_of(CANARY_SUBSET).unwrap_or(0);
        let breached = self.breach_at.is_some_and(|at| weight >= at);
        let (error_rate, success_rate) = if breached { (20.0, 80.0) } else { (0.5, 99.5) };

        Ok(MeshStatus {
            status: HealthStatus::Healthy,
            services: vec![ServiceMeshEntry {
                service: last.service.clone(),
                namespace: last.namespace.clone(),
                subsets: vec![SubsetMetrics {
                    name: CANARY_SUBSET.to_string(),
                    weight,
                    request_count: 1000,
                    error_rate,
                    success_rate,
                }],
            }],
            message: None,
        })
    }
}

// ================================= COMPLIANCE =================================== //

pub struct ScoredCompliance {
    pub scores: HashMap<String, f64>,
    pub events: Mutex<Vec<AuditEvent>>,
    pub assessments: AtomicUsize,
}

impl ScoredCompliance {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores
                .iter()
                .map(|(framework, score)| (framework.to_string(), *score))
                .collect(),
            events: Mutex::new(Vec::new()),
            assessments: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ComplianceManager for ScoredCompliance {
    async fn perform_compliance_assessment(
        &self,
        frameworks: &[String],
    ) -> Result<Vec<ComplianceReport>, OrchestratorError> {
        self.assessments.fetch_add(1, Ordering::SeqCst);
        Ok(frameworks
            .iter()
            .map(|framework| ComplianceReport {
                framework: framework.clone(),
                score: self.scores.get(framework).copied().unwrap_or(100.0),
                gaps: Vec::new(),
            })
            .collect())
    }

    async fn log_audit_event(&self, event: &AuditEvent) -> Result<(), OrchestratorError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }

    async fn get_compliance_health(&self) -> Result<ComplianceHealth, OrchestratorError> {
        Ok(ComplianceHealth {
            status: HealthStatus::Healthy,
            message: None,
        })
    }
}

// ================================= STATE ======================================== //

/// Memory store counting lock traffic per lock type
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStateStore,
    pub acquired: Mutex<HashMap<LockType, usize>>,
    pub released: Mutex<HashMap<LockType, usize>>,
}

impl CountingStore {
    pub fn acquired(&self, lock_type: LockType) -> usize {
        lock(&self.acquired).get(&lock_type).copied().unwrap_or(0)
    }

    pub fn released(&self, lock_type: LockType) -> usize {
        lock(&self.released).get(&lock_type).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for CountingStore {
    async fn acquire_lock(&self, key: &str, lock_type: LockType, ttl: Duration) -> LockStatus {
        let status = self.inner.acquire_lock(key, lock_type, ttl).await;
        if status == LockStatus::Acquired {
            *lock(&self.acquired).entry(lock_type).or_default() += 1;
        }
        status
    }

    async fn release_lock(&self, key: &str, lock_type: LockType) -> Result<(), OrchestratorError> {
        *lock(&self.released).entry(lock_type).or_default() += 1;
        self.inner.release_lock(key, lock_type).await
    }

    async fn put_result(&self, result: &DeploymentResult) -> Result<(), OrchestratorError> {
        self.inner.put_result(result).await
    }

    async fn get_result(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentResult>, OrchestratorError> {
        self.inner.get_result(deployment_id).await
    }

    async fn list_results(&self) -> Result<Vec<DeploymentResult>, OrchestratorError> {
        self.inner.list_results().await
    }
}

// ================================= BUILDERS ===================================== //

/// One attempt, no backoff: failures surface immediately
pub fn fast_resilience() -> Resilience {
    Resilience::new(
        CircuitBreakerConfig::default(),
        RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
    )
}

pub fn orchestrator(capabilities: Capabilities, store: Arc<CountingStore>) -> Orchestrator {
    Orchestrator::new(
        capabilities,
        store,
        fast_resilience(),
        OrchestratorConfig::default(),
    )
}

pub fn rolling_request(id: &str) -> DeploymentRequest {
    DeploymentRequest::new(
        id,
        "analytics-svc",
        "2.0.0",
        serde_json::json!({"kind": "Deployment", "image": "analytics-svc:2.0.0"}),
    )
    .with_config(DeploymentConfig {
        strategy: Strategy::Rolling,
        ..DeploymentConfig::default()
    })
}

pub fn canary_request(id: &str, initial_weight: u8, step: u8) -> DeploymentRequest {
    let mut request = rolling_request(id);
    request.config.strategy = Strategy::Canary;
    request.config.service_mesh.enabled = true;
    request.config.service_mesh.traffic_splitting = true;
    request.config.service_mesh.canary.initial_weight = initial_weight;
    request.config.service_mesh.canary.step = step;
    request.config.service_mesh.canary.interval_secs = 30;
    request
}
