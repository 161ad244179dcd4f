//! Collaborator subsystems the orchestrator drives
//!
//! Each subsystem sits behind an async trait so that the executor can be run
//! against the REST gateway in production and against in-memory doubles in
//! tests. Subsystems nobody configured are filled with no-op implementations.

pub mod noop;
pub mod rest;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::models::{AlertRule, DashboardSpec, Subsystem};

pub use noop::{NoopCompliance, NoopMonitoring, NoopPlatform, NoopSecurity, NoopServiceMesh};
pub use rest::RestGateway;
pub use types::{
    AuditEvent, ComplianceHealth, ComplianceReport, ControlGap, HealthCheck, MeshStatus,
    PlatformDeployConfig, PlatformDeployOutcome, PlatformHealth, PlatformRollbackOutcome,
    PodStatus, ReplicaCounts, SecretRequest, SecurityHealth, ServiceMeshEntry, Severity,
    SlaSnapshot, SubsetMetrics, SystemHealth, TrafficSplit, TrafficSubset, VulnerabilityReport,
    WorkloadState, CANARY_SUBSET, STABLE_SUBSET,
};

/// Workload platform (the cluster API)
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn deploy(
        &self,
        config: &PlatformDeployConfig,
    ) -> Result<PlatformDeployOutcome, OrchestratorError>;

    /// Revert `name` in `namespace` to its previous revision
    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<PlatformRollbackOutcome, OrchestratorError>;

    async fn get_health_status(&self) -> Result<PlatformHealth, OrchestratorError>;

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

#[async_trait]
pub trait ServiceMeshManager: Send + Sync {
    async fn configure_traffic_splitting(&self, split: &TrafficSplit)
        -> Result<(), OrchestratorError>;

    async fn get_service_mesh_status(&self) -> Result<MeshStatus, OrchestratorError>;

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

#[async_trait]
pub trait SecurityManager: Send + Sync {
    async fn create_secret(&self, secret: &SecretRequest) -> Result<(), OrchestratorError>;

    async fn get_security_health(&self) -> Result<SecurityHealth, OrchestratorError>;

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

#[async_trait]
pub trait ComplianceManager: Send + Sync {
    /// One report per requested framework
    async fn perform_compliance_assessment(
        &self,
        frameworks: &[String],
    ) -> Result<Vec<ComplianceReport>, OrchestratorError>;

    async fn log_audit_event(&self, event: &AuditEvent) -> Result<(), OrchestratorError>;

    async fn get_compliance_health(&self) -> Result<ComplianceHealth, OrchestratorError>;

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

#[async_trait]
pub trait MonitoringManager: Send + Sync {
    /// Returns the dashboard identifier
    async fn create_dashboard(&self, dashboard: &DashboardSpec)
        -> Result<String, OrchestratorError>;

    async fn add_alert_rule(&self, rule: &AlertRule) -> Result<(), OrchestratorError>;

    async fn get_system_health(&self) -> Result<SystemHealth, OrchestratorError>;

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// The set of collaborators one orchestrator drives
#[derive(Clone)]
pub struct Capabilities {
    pub platform: Arc<dyn PlatformAdapter>,
    pub mesh: Arc<dyn ServiceMeshManager>,
    pub security: Arc<dyn SecurityManager>,
    pub compliance: Arc<dyn ComplianceManager>,
    pub monitoring: Arc<dyn MonitoringManager>,
    configured: BTreeSet<Subsystem>,
}

impl Capabilities {
    /// Platform only; every optional subsystem is a no-op
    pub fn new(platform: Arc<dyn PlatformAdapter>) -> Self {
        Self {
            platform,
            mesh: Arc::new(NoopServiceMesh),
            security: Arc::new(NoopSecurity),
            compliance: Arc::new(NoopCompliance),
            monitoring: Arc::new(NoopMonitoring),
            configured: BTreeSet::new(),
        }
    }

    /// Every subsystem served by the same REST gateway
    pub fn from_gateway(gateway: Arc<RestGateway>) -> Self {
        Self::new(gateway.clone())
            .with_mesh(gateway.clone())
            .with_security(gateway.clone())
            .with_compliance(gateway.clone())
            .with_monitoring(gateway)
    }

    pub fn with_mesh(mut self, mesh: Arc<dyn ServiceMeshManager>) -> Self {
        self.mesh = mesh;
        self.configured.insert(Subsystem::ServiceMesh);
        self
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityManager>) -> Self {
        self.security = security;
        self.configured.insert(Subsystem::Security);
        self
    }

    pub fn with_compliance(mut self, compliance: Arc<dyn ComplianceManager>) -> Self {
        self.compliance = compliance;
        self.configured.insert(Subsystem::Compliance);
        self
    }

    pub fn with_monitoring(mut self, monitoring: Arc<dyn MonitoringManager>) -> Self {
        self.monitoring = monitoring;
        self.configured.insert(Subsystem::Monitoring);
        self
    }

    pub fn is_configured(&self, subsystem: Subsystem) -> bool {
        self.configured.contains(&subsystem)
    }

    /// Subsystem name to whether a real implementation is wired in
    pub fn describe(&self) -> BTreeMap<&'static str, bool> {
        let mut map: BTreeMap<&'static str, bool> = Subsystem::ALL
            .iter()
            .map(|s| (s.as_str(), self.is_configured(*s)))
            .collect();
        map.insert("platform", true);
        map
    }

    /// Close every collaborator, collecting failures
    pub async fn close_all(&self) -> Vec<OrchestratorError> {
        let results = futures::join!(
            self.platform.close(),
            self.mesh.close(),
            self.security.close(),
            self.compliance.close(),
            self.monitoring.close(),
        );
        [results.0, results.1, results.2, results.3, results.4]
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }
}
