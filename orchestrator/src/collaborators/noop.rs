//! No-op collaborators for subsystems that are not wired in

use api_models::HealthStatus;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::collaborators::types::*;
use crate::collaborators::{
    ComplianceManager, MonitoringManager, PlatformAdapter, SecurityManager, ServiceMeshManager,
};
use crate::errors::OrchestratorError;
use crate::models::{AlertRule, DashboardSpec};

const NOT_CONFIGURED: &str = "not configured";

/// Dry-run platform: reports every workload as deployed
pub struct NoopPlatform;

#[async_trait]
impl PlatformAdapter for NoopPlatform {
    async fn deploy(
        &self,
        config: &PlatformDeployConfig,
    ) -> Result<PlatformDeployOutcome, OrchestratorError> {
        debug!(deployment_id = %config.deployment_id, "dry-run deploy");
        Ok(PlatformDeployOutcome {
            cluster: config.region.clone(),
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
        Ok(PlatformRollbackOutcome {
            restored_version: None,
        })
    }

    async fn get_health_status(&self) -> Result<PlatformHealth, OrchestratorError> {
        Ok(PlatformHealth {
            status: HealthStatus::Healthy,
            services: Vec::new(),
            pods: Vec::new(),
            message: Some(NOT_CONFIGURED.to_string()),
        })
    }
}

pub struct NoopServiceMesh;

#[async_trait]
impl ServiceMeshManager for NoopServiceMesh {
    async fn configure_traffic_splitting(
        &self,
        _split: &TrafficSplit,
    ) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn get_service_mesh_status(&self) -> Result<MeshStatus, OrchestratorError> {
        Ok(MeshStatus {
            status: HealthStatus::Healthy,
            services: Vec::new(),
            message: Some(NOT_CONFIGURED.to_string()),
        })
    }
}

pub struct NoopSecurity;

#[async_trait]
impl SecurityManager for NoopSecurity {
    async fn create_secret(&self, _secret: &SecretRequest) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn get_security_health(&self) -> Result<SecurityHealth, OrchestratorError> {
        Ok(SecurityHealth {
            status: HealthStatus::Healthy,
            vulnerability_reports: Vec::new(),
            message: Some(NOT_CONFIGURED.to_string()),
        })
    }
}

pub struct NoopCompliance;

#[async_trait]
impl ComplianceManager for NoopCompliance {
    async fn perform_compliance_assessment(
        &self,
        frameworks: &[String],
    ) -> Result<Vec<ComplianceReport>, OrchestratorError> {
        Ok(frameworks
            .iter()
            .map(|framework| ComplianceReport {
                framework: framework.clone(),
                score: 100.0,
                gaps: Vec::new(),
            })
            .collect())
    }

    async fn log_audit_event(&self, _event: &AuditEvent) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn get_compliance_health(&self) -> Result<ComplianceHealth, OrchestratorError> {
        Ok(ComplianceHealth {
            status: HealthStatus::Healthy,
            message: Some(NOT_CONFIGURED.to_string()),
        })
    }
}

pub struct NoopMonitoring;

#[async_trait]
impl MonitoringManager for NoopMonitoring {
    async fn create_dashboard(&self, dashboard: &DashboardSpec) -> Result<String, OrchestratorError> {
        Ok(format!("noop-{}", dashboard.title))
    }

    async fn add_alert_rule(&self, _rule: &AlertRule) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn get_system_health(&self) -> Result<SystemHealth, OrchestratorError> {
        Ok(SystemHealth {
            status: HealthStatus::Healthy,
            sla: Some(SlaSnapshot {
                availability: 100.0,
                latency_p95_ms: 0.0,
                error_rate: 0.0,
                captured_at: Utc::now(),
            }),
            message: Some(NOT_CONFIGURED.to_string()),
        })
    }
}
