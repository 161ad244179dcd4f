//! Phase executor
//!
//! Runs one deployment request through the phase machine while holding the
//! deployment lock. Every collaborator call goes through [`Resilience`], every
//! phase appends to the run's audit trail, and each phase change publishes a
//! snapshot to the result index so callers can watch progress.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api_models::{ComponentHealth, HealthStatus};
use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::results::ResultIndex;
use crate::collaborators::{
    AuditEvent, Capabilities, PlatformDeployConfig, SecretRequest, TrafficSplit, WorkloadState,
};
use crate::deploy::canary::{CanaryController, STABLE_VERSION};
use crate::deploy::defaults::{default_alert_rules, default_dashboard};
use crate::deploy::fsm::{Phase, PhaseEvent, PhaseMachine};
use crate::deploy::rollback::RollbackController;
use crate::deploy::scoring::{aggregate_compliance, security_score, ScoringConfig, SecurityPosture};
use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::{
    AuditCategory, AuditOutcome, ClusterStatus, ComplianceFindings, DeploymentRequest,
    DeploymentResult, DeploymentStatus, MeshFindings, MonitoringFindings, ResultAccumulator,
    RollbackResult, SecurityFindings, Subsystem,
};
use crate::resilience::{CircuitState, Resilience};
use crate::state::{LockStatus, LockType, StateStore};
use crate::storage::settings::EnvironmentOverrides;
use crate::telemetry::{collect_metrics, MetricsSnapshot, OrchestratorMetrics, RunOutcome, SystemMetrics};
use crate::utils::sha256_hash;

const ACTOR: &str = "fabrollout";

/// Executor knobs that do not come from the request
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub lock_ttl: Duration,
    pub scoring: ScoringConfig,
    pub environments: BTreeMap<String, EnvironmentOverrides>,
    pub index_capacity: usize,
    /// Where the metrics snapshot is written at shutdown
    pub metrics_file: Option<File>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(1800),
            scoring: ScoringConfig::default(),
            environments: BTreeMap::new(),
            index_capacity: 256,
            metrics_file: None,
        }
    }
}

/// Aggregated health of the orchestrator and everything it drives
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub circuit_breakers: BTreeMap<String, CircuitState>,
    pub active_deployments: usize,
    pub accepting: bool,
    pub metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMetrics>,
}

/// Lock held for the duration of a run. Dropping it without
/// [`HeldLock::release`] releases it from a spawned task.
struct HeldLock {
    store: Arc<dyn StateStore>,
    key: String,
    lock_type: LockType,
    released: bool,
}

impl HeldLock {
    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.release_lock(&self.key, self.lock_type).await {
            warn!(key = %self.key, lock_type = %self.lock_type, error = %e, "failed to release lock");
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let lock_type = self.lock_type;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_lock(&key, lock_type).await {
                        warn!(%key, %lock_type, error = %e, "failed to release abandoned lock");
                    }
                });
            }
            Err(_) => warn!(%key, %lock_type, "lock abandoned outside a runtime; it expires with its TTL"),
        }
    }
}

/// Runs in flight, and a wakeup for shutdown when the last one ends
#[derive(Default)]
struct Drain {
    count: AtomicUsize,
    drained: Notify,
}

struct InFlight(Arc<Drain>);

impl InFlight {
    fn enter(drain: &Arc<Drain>) -> Self {
        drain.count.fetch_add(1, Ordering::SeqCst);
        Self(drain.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

/// An admitted run: counted in flight and holding its deployment lock
struct Admission {
    _in_flight: InFlight,
    lock: HeldLock,
}

pub struct Orchestrator {
    capabilities: Capabilities,
    store: Arc<dyn StateStore>,
    resilience: Resilience,
    index: ResultIndex,
    metrics: OrchestratorMetrics,
    config: OrchestratorConfig,
    accepting: AtomicBool,
    drain: Arc<Drain>,
}

impl Orchestrator {
    pub fn new(
        capabilities: Capabilities,
        store: Arc<dyn StateStore>,
        resilience: Resilience,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            capabilities,
            store,
            resilience,
            index: ResultIndex::new(config.index_capacity),
            metrics: OrchestratorMetrics::new(),
            config,
            accepting: AtomicBool::new(true),
            drain: Arc::new(Drain::default()),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.drain.count.load(Ordering::SeqCst)
    }

    fn lock_ttl(&self, environment: &str) -> Duration {
        self.config
            .environments
            .get(environment)
            .and_then(|o| o.lock_ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(self.config.lock_ttl)
    }

    /// Request override, then environment override, then the global gate
    fn compliance_threshold(&self, request: &DeploymentRequest) -> f64 {
        request
            .config
            .compliance
            .threshold
            .or_else(|| {
                self.config
                    .environments
                    .get(&request.config.environment)
                    .and_then(|o| o.compliance_threshold)
            })
            .unwrap_or(self.config.scoring.compliance_threshold)
    }

    async fn acquire(
        &self,
        key: &str,
        lock_type: LockType,
        ttl: Duration,
    ) -> Result<HeldLock, OrchestratorError> {
        match self.store.acquire_lock(key, lock_type, ttl).await {
            LockStatus::Acquired => Ok(HeldLock {
                store: self.store.clone(),
                key: key.to_string(),
                lock_type,
                released: false,
            }),
            LockStatus::AlreadyLocked => Err(OrchestratorError::LockContention(key.to_string())),
            LockStatus::Error(message) => Err(OrchestratorError::StateStore(message)),
        }
    }

    /// Admit a run: reject during shutdown and take the deployment lock
    async fn admit(&self, request: &DeploymentRequest) -> Result<Admission, OrchestratorError> {
        if request.id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "id must not be empty".to_string(),
            ));
        }

        let in_flight = InFlight::enter(&self.drain);
        if !self.is_accepting() {
            return Err(OrchestratorError::Shutdown(
                "orchestrator is shutting down".to_string(),
            ));
        }

        let ttl = self.lock_ttl(&request.config.environment);
        match self.acquire(&request.id, LockType::Deployment, ttl).await {
            Ok(lock) => Ok(Admission {
                _in_flight: in_flight,
                lock,
            }),
            Err(e) => {
                if matches!(e, OrchestratorError::LockContention(_)) {
                    self.metrics.record_lock_contention();
                }
                warn!(deployment_id = %request.id, error = %e, "deployment lock not acquired");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: DeploymentRequest,
        admission: Admission,
    ) -> Result<DeploymentResult, OrchestratorError> {
        let Admission { _in_flight, lock } = admission;
        let outcome = self.run_locked(&request).await;
        lock.release().await;
        outcome
    }

    /// Run a deployment to completion. The failed run's result stays
    /// available through [`Orchestrator::get_status`] after the error is
    /// returned.
    pub async fn deploy(
        &self,
        request: DeploymentRequest,
    ) -> Result<DeploymentResult, OrchestratorError> {
        let admission = self.admit(&request).await?;
        self.execute(request, admission).await
    }

    /// Take the lock now and run the phases on a spawned task. Lock
    /// contention and shutdown are reported here rather than by the task.
    pub async fn submit(
        self: &Arc<Self>,
        request: DeploymentRequest,
    ) -> Result<JoinHandle<Result<DeploymentResult, OrchestratorError>>, OrchestratorError> {
        let admission = self.admit(&request).await?;
        let orchestrator = self.clone();
        Ok(tokio::spawn(async move {
            orchestrator.execute(request, admission).await
        }))
    }

    async fn run_locked(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentResult, OrchestratorError> {
        let environment = &request.config.environment;
        let region = &request.config.region;
        info!(
            deployment_id = %request.id,
            name = %request.name,
            version = %request.version,
            strategy = %request.config.strategy,
            environment = %environment,
            "starting deployment"
        );
        self.metrics.record_started(environment, region);

        let mut acc = ResultAccumulator::new(
            &request.id,
            &request.name,
            &request.version,
            request.config.strategy,
            environment,
            region,
        );
        let mut fsm = PhaseMachine::new();
        self.index.upsert(acc.snapshot());

        match self.run_phases(request, &mut acc, &mut fsm).await {
            Ok(status) => {
                let outcome = if status == DeploymentStatus::Partial {
                    RunOutcome::Partial
                } else {
                    RunOutcome::Success
                };
                self.metrics.record_outcome(environment, region, outcome);

                let result = acc.finalize();
                self.publish(&result).await;
                info!(deployment_id = %request.id, status = %result.status, "deployment finished");
                Ok(result)
            }
            Err(e) => Err(self.handle_failure(request, acc, fsm, e).await),
        }
    }

    /// Mark the run failed, roll back when allowed and publish. Returns the
    /// original error.
    async fn handle_failure(
        &self,
        request: &DeploymentRequest,
        mut acc: ResultAccumulator,
        mut fsm: PhaseMachine,
        err: OrchestratorError,
    ) -> OrchestratorError {
        let environment = &request.config.environment;
        let region = &request.config.region;
        let failed_in = fsm.phase();
        error!(deployment_id = %request.id, phase = %failed_in, error = %err, "deployment failed");

        if let Err(e) = fsm.process(PhaseEvent::Fail(err.to_string())) {
            warn!(deployment_id = %request.id, error = %e, "phase machine rejected failure");
        }
        acc.set_phase(Phase::Failed);
        acc.set_error(err.to_string());
        if let Err(e) = acc.set_status(DeploymentStatus::Failed) {
            warn!(deployment_id = %request.id, error = %e, "status not moved to failed");
        }
        self.metrics.record_outcome(environment, region, RunOutcome::Failed);
        match err {
            OrchestratorError::ComplianceBlocked { .. } => self.metrics.record_compliance_block(),
            OrchestratorError::CanaryAborted { .. } => self.metrics.record_canary_abort(),
            _ => {}
        }

        let canary_breach = matches!(err, OrchestratorError::CanaryAborted { .. });
        let workload_touched = fsm.has_entered(Phase::CoreDeployment);
        if canary_breach || (request.config.rollback_on_failure && workload_touched) {
            if let Err(e) = fsm.process(PhaseEvent::Rollback) {
                warn!(deployment_id = %request.id, error = %e, "phase machine rejected rollback");
            }
            acc.set_phase(Phase::Rollback);
            self.index.upsert(acc.snapshot());

            let rollback = self.run_rollback(request, &err.to_string()).await;
            acc.audit(
                AuditCategory::Rollback,
                "rollback",
                if rollback.success {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failure
                },
                (!rollback.errors.is_empty()).then(|| rollback.errors.join("; ")),
            );
            self.metrics.record_rollback(environment, region);
            if rollback.success {
                if let Err(e) = acc.set_status(DeploymentStatus::RolledBack) {
                    warn!(deployment_id = %request.id, error = %e, "status not moved to rollback");
                }
            }
            acc.set_rollback(rollback);
        } else {
            debug!(deployment_id = %request.id, "rollback not required");
        }

        let result = acc.finalize();
        self.publish(&result).await;
        err
    }

    /// Rollback under its own lock so concurrent rollbacks of one id serialize
    async fn run_rollback(&self, request: &DeploymentRequest, reason: &str) -> RollbackResult {
        let ttl = self.lock_ttl(&request.config.environment);
        let lock = match self.acquire(&request.id, LockType::Rollback, ttl).await {
            Ok(lock) => lock,
            Err(e) => {
                error!(deployment_id = %request.id, error = %e, "rollback lock not acquired");
                return RollbackResult {
                    triggered: true,
                    reason: reason.to_string(),
                    completed_at: Utc::now(),
                    success: false,
                    restored_version: None,
                    errors: vec![format!("rollback lock: {}", e)],
                };
            }
        };

        let result = RollbackController::new(&self.capabilities, &self.resilience)
            .rollback(&request.id, request, reason)
            .await;
        lock.release().await;
        result
    }

    async fn publish(&self, result: &DeploymentResult) {
        self.index.upsert(result.clone());
        if let Err(e) = self.store.put_result(result).await {
            error!(deployment_id = %result.deployment_id, error = %e, "failed to persist result");
        }
    }

    fn enter(
        &self,
        fsm: &mut PhaseMachine,
        acc: &mut ResultAccumulator,
        phase: Phase,
    ) -> Result<(), OrchestratorError> {
        fsm.process(PhaseEvent::Enter(phase))
            .map_err(OrchestratorError::Internal)?;
        acc.set_phase(phase);
        let snapshot = acc.snapshot();
        debug!(deployment_id = %snapshot.deployment_id, phase = %phase, "entered phase");
        self.index.upsert(snapshot);
        Ok(())
    }

    async fn run_phases(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
        fsm: &mut PhaseMachine,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        self.enter(fsm, acc, Phase::PreValidation)?;
        self.pre_validation(request, acc).await?;

        if request.is_enabled(Subsystem::Security) {
            self.enter(fsm, acc, Phase::SecuritySetup)?;
            self.security_setup(request, acc).await?;
        }

        self.enter(fsm, acc, Phase::CoreDeployment)?;
        self.core_deployment(request, acc).await?;

        if request.is_enabled(Subsystem::ServiceMesh) {
            self.enter(fsm, acc, Phase::ServiceMesh)?;
            self.service_mesh(request, acc).await?;
        }

        if request.is_enabled(Subsystem::Monitoring) {
            self.enter(fsm, acc, Phase::MonitoringSetup)?;
            self.monitoring_setup(request, acc).await?;
        }

        if request.is_enabled(Subsystem::Compliance) {
            self.enter(fsm, acc, Phase::ComplianceValidation)?;
            self.compliance_validation(request, acc).await?;
        }

        self.enter(fsm, acc, Phase::PostDeployment)?;
        self.post_deployment(request, acc).await?;

        self.enter(fsm, acc, Phase::FinalValidation)?;
        let status = self.final_validation(request, acc).await?;
        complete(acc, fsm, status)?;
        Ok(status)
    }

    // ================================= PHASES ===================================== //

    async fn pre_validation(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        if let Err(e) = request.validate() {
            acc.audit(
                AuditCategory::Deployment,
                "validate_request",
                AuditOutcome::Failure,
                Some(e.to_string()),
            );
            return Err(e);
        }
        acc.set_manifest_digest(sha256_hash(&serde_json::to_vec(&request.manifest)?));

        let environment = &request.config.environment;
        let platform = &self.capabilities.platform;
        let health = self
            .resilience
            .call(environment, "platform.get_health_status", || {
                platform.get_health_status()
            })
            .await?;
        if health.status == HealthStatus::Unhealthy {
            let message = health
                .message
                .unwrap_or_else(|| "platform reports unhealthy".to_string());
            acc.audit(
                AuditCategory::Deployment,
                "platform_health",
                AuditOutcome::Failure,
                Some(message.clone()),
            );
            return Err(OrchestratorError::collaborator("platform", message));
        }
        acc.audit(
            AuditCategory::Deployment,
            "pre_validation",
            AuditOutcome::Success,
            None,
        );

        let compliance = &request.config.compliance;
        if compliance.enabled && compliance.blocking {
            let findings = self.assess_compliance(request).await?;
            let (score, threshold, passed) =
                (findings.overall_score, findings.threshold, findings.passed);
            acc.set_compliance(findings);
            acc.audit(
                AuditCategory::Compliance,
                "compliance_preflight",
                if passed {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failure
                },
                Some(format!("score {:.1}, threshold {:.1}", score, threshold)),
            );
            if !passed {
                return Err(OrchestratorError::ComplianceBlocked { score, threshold });
            }
        }
        Ok(())
    }

    async fn security_setup(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        let environment = &request.config.environment;
        let security_config = &request.config.security;
        let security = &self.capabilities.security;

        let mut secrets_managed = Vec::with_capacity(security_config.secrets.len());
        for spec in &security_config.secrets {
            let secret = SecretRequest::from_spec(spec, &request.config.namespace, &request.id);
            if let Err(e) = self
                .resilience
                .call(environment, "security.create_secret", || {
                    security.create_secret(&secret)
                })
                .await
            {
                acc.audit(
                    AuditCategory::Security,
                    "create_secret",
                    AuditOutcome::Failure,
                    Some(format!("{}: {}", spec.name, e)),
                );
                return Err(e);
            }
            acc.audit(
                AuditCategory::Security,
                "create_secret",
                AuditOutcome::Success,
                Some(spec.name.clone()),
            );
            secrets_managed.push(spec.name.clone());
        }

        let health = self
            .resilience
            .call(environment, "security.get_security_health", || {
                security.get_security_health()
            })
            .await?;

        let score = security_score(
            &self.config.scoring,
            &SecurityPosture {
                rbac: security_config.rbac,
                network_policies: security_config.network_policies.len(),
                vulnerability_scan: security_config.vulnerability_scan,
                reports: &health.vulnerability_reports,
            },
        );
        acc.audit(
            AuditCategory::Security,
            "security_assessment",
            AuditOutcome::Success,
            Some(format!("score {}", score)),
        );
        acc.set_security(SecurityFindings {
            secrets_managed,
            rbac_enabled: security_config.rbac,
            network_policies: security_config.network_policies.len(),
            vulnerability_scans: if security_config.vulnerability_scan {
                health.vulnerability_reports
            } else {
                Vec::new()
            },
            score,
        });
        info!(deployment_id = %request.id, score, "security setup complete");
        Ok(())
    }

    async fn core_deployment(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), request.name.clone());
        labels.insert("version".to_string(), request.version.clone());
        labels.insert("fabrollout/deployment-id".to_string(), request.id.clone());

        let deploy_config = PlatformDeployConfig {
            deployment_id: request.id.clone(),
            name: request.name.clone(),
            version: request.version.clone(),
            namespace: request.config.namespace.clone(),
            region: request.config.region.clone(),
            strategy: request.config.strategy,
            replicas: request.config.replicas,
            manifest: request.manifest.clone(),
            labels,
        };

        let platform = &self.capabilities.platform;
        let outcome = match self
            .resilience
            .call(&request.config.environment, "platform.deploy", || {
                platform.deploy(&deploy_config)
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                acc.audit(
                    AuditCategory::Deployment,
                    "platform.deploy",
                    AuditOutcome::Failure,
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        acc.push_cluster(ClusterStatus {
            cluster: outcome.cluster.clone(),
            namespace: request.config.namespace.clone(),
            workload_status: outcome.status.as_str().to_string(),
            replicas_desired: outcome.replicas.desired,
            replicas_ready: outcome.replicas.ready,
            pods: outcome.pods,
            services: Vec::new(),
            health_checks: outcome.health_checks,
        });

        if outcome.status == WorkloadState::Failed {
            acc.audit(
                AuditCategory::Deployment,
                "platform.deploy",
                AuditOutcome::Failure,
                Some(format!("workload failed on {}", outcome.cluster)),
            );
            return Err(OrchestratorError::collaborator(
                "platform",
                format!("workload failed on cluster {}", outcome.cluster),
            ));
        }

        acc.audit(
            AuditCategory::Deployment,
            "platform.deploy",
            AuditOutcome::Success,
            Some(format!(
                "{} on {} ({}/{} ready)",
                outcome.status.as_str(),
                outcome.cluster,
                outcome.replicas.ready,
                outcome.replicas.desired
            )),
        );
        info!(deployment_id = %request.id, cluster = %outcome.cluster, "workload applied");
        Ok(())
    }

    async fn service_mesh(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        let environment = &request.config.environment;
        let mesh_config = &request.config.service_mesh;
        let mesh = &self.capabilities.mesh;
        let mut findings = MeshFindings {
            mtls: mesh_config.mtls,
            stable_weight: 100,
            ..MeshFindings::default()
        };

        if request.uses_canary() {
            let ramp = CanaryController::new(mesh, &self.resilience)
                .run(request, &mut findings)
                .await;
            let details = Some(format!(
                "canary weight {} after {} increments",
                findings.canary_weight, findings.increments
            ));
            acc.set_service_mesh(findings);
            return match ramp {
                Ok(()) => {
                    acc.audit(
                        AuditCategory::ServiceMesh,
                        "canary_rollout",
                        AuditOutcome::Success,
                        details,
                    );
                    Ok(())
                }
                Err(e) => {
                    acc.audit(
                        AuditCategory::ServiceMesh,
                        "canary_rollout",
                        AuditOutcome::Failure,
                        Some(e.to_string()),
                    );
                    Err(e)
                }
            };
        }

        if mesh_config.traffic_splitting {
            let split = TrafficSplit::canary(
                &request.name,
                &request.config.namespace,
                STABLE_VERSION,
                &request.version,
                100,
                mesh_config.mtls,
            );
            if let Err(e) = self
                .resilience
                .call(environment, "mesh.configure_traffic_splitting", || {
                    mesh.configure_traffic_splitting(&split)
                })
                .await
            {
                acc.audit(
                    AuditCategory::ServiceMesh,
                    "traffic_switch",
                    AuditOutcome::Failure,
                    Some(e.to_string()),
                );
                return Err(e);
            }
            findings.stable_weight = 0;
            findings.canary_weight = 100;
            findings.traffic_switched = true;
            acc.audit(
                AuditCategory::ServiceMesh,
                "traffic_switch",
                AuditOutcome::Success,
                Some(format!("all traffic to {}", request.version)),
            );
        } else {
            let status = self
                .resilience
                .call(environment, "mesh.get_service_mesh_status", || {
                    mesh.get_service_mesh_status()
                })
                .await?;
            acc.audit(
                AuditCategory::ServiceMesh,
                "mesh_status",
                AuditOutcome::Success,
                Some(format!("mesh {}", status.status)),
            );
        }

        acc.set_service_mesh(findings);
        Ok(())
    }

    async fn monitoring_setup(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        let environment = &request.config.environment;
        let monitoring_config = &request.config.monitoring;
        let monitoring = &self.capabilities.monitoring;

        let dashboards = if monitoring_config.dashboards.is_empty() {
            vec![default_dashboard(request)]
        } else {
            monitoring_config.dashboards.clone()
        };
        let mut dashboard_ids = Vec::with_capacity(dashboards.len());
        for dashboard in &dashboards {
            let id = self
                .resilience
                .call(environment, "monitoring.create_dashboard", || {
                    monitoring.create_dashboard(dashboard)
                })
                .await?;
            acc.audit(
                AuditCategory::Monitoring,
                "create_dashboard",
                AuditOutcome::Success,
                Some(dashboard.title.clone()),
            );
            dashboard_ids.push(id);
        }

        let rules = if monitoring_config.alert_rules.is_empty() {
            default_alert_rules(request)
        } else {
            monitoring_config.alert_rules.clone()
        };
        for rule in &rules {
            self.resilience
                .call(environment, "monitoring.add_alert_rule", || {
                    monitoring.add_alert_rule(rule)
                })
                .await?;
        }
        acc.audit(
            AuditCategory::Monitoring,
            "add_alert_rules",
            AuditOutcome::Success,
            Some(format!("{} rules", rules.len())),
        );

        let health = self
            .resilience
            .call(environment, "monitoring.get_system_health", || {
                monitoring.get_system_health()
            })
            .await?;

        acc.set_monitoring(MonitoringFindings {
            dashboards: dashboard_ids,
            alerts_created: rules.len(),
            sla: health.sla,
        });
        Ok(())
    }

    async fn assess_compliance(
        &self,
        request: &DeploymentRequest,
    ) -> Result<ComplianceFindings, OrchestratorError> {
        let compliance = &self.capabilities.compliance;
        let frameworks = &request.config.compliance.frameworks;
        let reports = self
            .resilience
            .call(
                &request.config.environment,
                "compliance.perform_compliance_assessment",
                || compliance.perform_compliance_assessment(frameworks),
            )
            .await?;
        Ok(aggregate_compliance(&reports, self.compliance_threshold(request)))
    }

    async fn compliance_validation(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        let findings = self.assess_compliance(request).await?;
        let (score, threshold, passed) =
            (findings.overall_score, findings.threshold, findings.passed);

        let event = AuditEvent {
            deployment_id: request.id.clone(),
            action: "deployment.compliance_validation".to_string(),
            actor: ACTOR.to_string(),
            outcome: if passed { "pass" } else { "fail" }.to_string(),
            timestamp: Utc::now(),
            details: serde_json::json!({
                "frameworks": findings.framework_scores,
                "overall_score": score,
                "threshold": threshold,
                "violations": findings.violations.len(),
            }),
        };
        acc.set_compliance(findings);

        let compliance = &self.capabilities.compliance;
        if let Err(e) = self
            .resilience
            .call(&request.config.environment, "compliance.log_audit_event", || {
                compliance.log_audit_event(&event)
            })
            .await
        {
            warn!(deployment_id = %request.id, error = %e, "audit event not recorded");
        }

        acc.audit(
            AuditCategory::Compliance,
            "compliance_assessment",
            if passed {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            },
            Some(format!("score {:.1}, threshold {:.1}", score, threshold)),
        );

        if !passed && request.config.compliance.blocking {
            return Err(OrchestratorError::ComplianceBlocked { score, threshold });
        }
        if !passed {
            warn!(deployment_id = %request.id, score, threshold, "compliance below threshold");
        }
        Ok(())
    }

    async fn post_deployment(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<(), OrchestratorError> {
        let platform = &self.capabilities.platform;
        let health = self
            .resilience
            .call(&request.config.environment, "platform.get_health_status", || {
                platform.get_health_status()
            })
            .await?;

        if let Some(cluster) = acc.clusters_mut().last_mut() {
            cluster.services = health.services.clone();
            if !health.pods.is_empty() {
                cluster.replicas_ready = health.pods.iter().filter(|p| p.ready).count() as u32;
                cluster.pods = health.pods.clone();
            }
        }

        if health.status == HealthStatus::Unhealthy {
            let message = health
                .message
                .unwrap_or_else(|| "platform unhealthy after deployment".to_string());
            acc.audit(
                AuditCategory::Deployment,
                "post_deployment",
                AuditOutcome::Failure,
                Some(message.clone()),
            );
            return Err(OrchestratorError::collaborator("platform", message));
        }
        acc.audit(
            AuditCategory::Deployment,
            "post_deployment",
            AuditOutcome::Success,
            Some(format!("platform {}", health.status)),
        );
        Ok(())
    }

    /// Probe the platform and every enabled subsystem; an unhealthy platform
    /// fails the run, a degraded optional subsystem makes it partial
    async fn final_validation(
        &self,
        request: &DeploymentRequest,
        acc: &mut ResultAccumulator,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        let environment = &request.config.environment;
        let mut probes: Vec<BoxFuture<'_, ComponentHealth>> =
            vec![self.probe_platform(environment).boxed()];
        for subsystem in Subsystem::ALL {
            if request.is_enabled(subsystem) {
                probes.push(self.probe(subsystem, environment));
            }
        }
        let components = join_all(probes).await;

        let mut status = DeploymentStatus::Success;
        for component in &components {
            if component.name == "platform" {
                if component.status == HealthStatus::Unhealthy {
                    acc.audit(
                        AuditCategory::Deployment,
                        "final_validation",
                        AuditOutcome::Failure,
                        component.message.clone(),
                    );
                    return Err(OrchestratorError::collaborator(
                        "platform",
                        component
                            .message
                            .clone()
                            .unwrap_or_else(|| "unhealthy at final validation".to_string()),
                    ));
                }
                if component.status == HealthStatus::Degraded {
                    status = DeploymentStatus::Partial;
                }
            } else if component.status != HealthStatus::Healthy {
                warn!(deployment_id = %request.id, component = %component.name, status = %component.status, "subsystem not healthy");
                status = DeploymentStatus::Partial;
            }
        }

        if acc.service_mesh().is_some_and(|m| m.awaiting_promotion) {
            status = DeploymentStatus::Partial;
        }

        let summary = components
            .iter()
            .map(|c| format!("{}={}", c.name, c.status))
            .collect::<Vec<_>>()
            .join(", ");
        acc.audit(
            AuditCategory::Deployment,
            "final_validation",
            AuditOutcome::Success,
            Some(summary),
        );
        Ok(status)
    }

    // ================================= HEALTH ===================================== //

    async fn probe_platform(&self, environment: &str) -> ComponentHealth {
        let platform = &self.capabilities.platform;
        match self
            .resilience
            .call(environment, "platform.get_health_status", || {
                platform.get_health_status()
            })
            .await
        {
            Ok(health) => ComponentHealth::new("platform", health.status, health.message),
            Err(e) => ComponentHealth::new("platform", HealthStatus::Unhealthy, Some(e.to_string())),
        }
    }

    fn probe<'a>(&'a self, subsystem: Subsystem, environment: &'a str) -> BoxFuture<'a, ComponentHealth> {
        let name = subsystem.as_str();
        let caps = &self.capabilities;
        let resilience = &self.resilience;
        async move {
            let probed = match subsystem {
                Subsystem::Security => resilience
                    .call(environment, "security.get_security_health", || {
                        caps.security.get_security_health()
                    })
                    .await
                    .map(|h| (h.status, h.message)),
                Subsystem::ServiceMesh => resilience
                    .call(environment, "mesh.get_service_mesh_status", || {
                        caps.mesh.get_service_mesh_status()
                    })
                    .await
                    .map(|h| (h.status, h.message)),
                Subsystem::Monitoring => resilience
                    .call(environment, "monitoring.get_system_health", || {
                        caps.monitoring.get_system_health()
                    })
                    .await
                    .map(|h| (h.status, h.message)),
                Subsystem::Compliance => resilience
                    .call(environment, "compliance.get_compliance_health", || {
                        caps.compliance.get_compliance_health()
                    })
                    .await
                    .map(|h| (h.status, h.message)),
            };
            match probed {
                Ok((status, message)) => ComponentHealth::new(name, status, message),
                Err(e) => ComponentHealth::new(name, HealthStatus::Degraded, Some(e.to_string())),
            }
        }
        .boxed()
    }

    /// Fan out to every collaborator and fold the answers with host and
    /// orchestrator metrics. An unhealthy platform makes the system unhealthy;
    /// anything else not healthy degrades it.
    pub async fn system_health(&self, environment: &str) -> HealthReport {
        let mut probes: Vec<BoxFuture<'_, ComponentHealth>> =
            vec![self.probe_platform(environment).boxed()];
        for subsystem in Subsystem::ALL {
            probes.push(self.probe(subsystem, environment));
        }
        let (components, system) = futures::join!(
            join_all(probes),
            tokio::task::spawn_blocking(collect_metrics)
        );

        let mut status = HealthStatus::Healthy;
        for component in &components {
            let contribution = match (component.name.as_str(), component.status) {
                ("platform", s) => s,
                (_, HealthStatus::Healthy) => HealthStatus::Healthy,
                _ => HealthStatus::Degraded,
            };
            status = status.worst(contribution);
        }

        HealthReport {
            status,
            components,
            circuit_breakers: self.resilience.breakers().states().into_iter().collect(),
            active_deployments: self.index.in_progress(),
            accepting: self.is_accepting(),
            metrics: self.metrics.snapshot(),
            system: system.ok(),
        }
    }

    // ================================= QUERIES ==================================== //

    /// Index first, then the state store
    pub async fn get_status(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentResult>, OrchestratorError> {
        if let Some(result) = self.index.get(deployment_id) {
            return Ok(Some(result));
        }
        self.store.get_result(deployment_id).await
    }

    /// Results known to this process, oldest first
    pub fn list_active(&self) -> Vec<DeploymentResult> {
        self.index.list()
    }

    /// Every persisted result, merged with the index
    pub async fn list_all(&self) -> Result<Vec<DeploymentResult>, OrchestratorError> {
        let mut merged: HashMap<String, DeploymentResult> = self
            .store
            .list_results()
            .await?
            .into_iter()
            .map(|r| (r.deployment_id.clone(), r))
            .collect();
        for result in self.index.list() {
            merged.insert(result.deployment_id.clone(), result);
        }
        let mut results: Vec<_> = merged.into_values().collect();
        results.sort_by_key(|r| r.start_time);
        Ok(results)
    }

    // ================================= SHUTDOWN =================================== //

    /// Stop accepting runs, wait up to `drain_timeout` for in-flight runs,
    /// close every collaborator and write the metrics snapshot
    pub async fn shutdown(&self, drain_timeout: Duration) -> MetricsSnapshot {
        self.accepting.store(false, Ordering::SeqCst);
        info!(in_flight = self.in_flight(), "orchestrator shutting down");

        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            let drained = self.drain.drained.notified();
            if self.in_flight() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                warn!(in_flight = self.in_flight(), "drain timed out, closing anyway");
                break;
            }
        }

        for e in self.capabilities.close_all().await {
            warn!(error = %e, "collaborator close failed");
        }

        let snapshot = self.metrics.snapshot();
        if let Some(file) = &self.config.metrics_file {
            if let Err(e) = file.write_json_atomic(&snapshot).await {
                error!(path = %file.path().display(), error = %e, "failed to write metrics snapshot");
            }
        }
        snapshot
    }
}

/// Move a run whose phases all passed to its final status
fn complete(
    acc: &mut ResultAccumulator,
    fsm: &mut PhaseMachine,
    status: DeploymentStatus,
) -> Result<(), OrchestratorError> {
    fsm.process(PhaseEvent::Complete)
        .map_err(OrchestratorError::Internal)?;
    acc.set_status(status)?;
    acc.set_phase(Phase::Completed);
    Ok(())
}
