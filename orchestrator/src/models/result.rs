//! Deployment result models
//!
//! A [`DeploymentResult`] is the published, read-only record of one run. While
//! the run is in flight the executor owns a [`ResultAccumulator`], the only
//! type allowed to mutate it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{HealthCheck, PodStatus, Severity, SlaSnapshot, VulnerabilityReport};
use crate::deploy::fsm::Phase;
use crate::errors::OrchestratorError;
use crate::models::request::Strategy;

/// Overall status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Success,
    Partial,
    Failed,
    #[serde(rename = "rollback")]
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Partial => "partial",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rollback",
        }
    }

    /// Status only moves forward
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        matches!(
            (self, next),
            (
                DeploymentStatus::InProgress,
                DeploymentStatus::Success | DeploymentStatus::Partial | DeploymentStatus::Failed
            ) | (DeploymentStatus::Failed, DeploymentStatus::RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::InProgress)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workload status on one cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster: String,
    pub namespace: String,
    pub workload_status: String,
    pub replicas_desired: u32,
    pub replicas_ready: u32,
    pub pods: Vec<PodStatus>,
    pub services: Vec<String>,
    pub health_checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityFindings {
    pub secrets_managed: Vec<String>,
    pub rbac_enabled: bool,
    pub network_policies: usize,
    pub vulnerability_scans: Vec<VulnerabilityReport>,
    /// 0-100
    pub score: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshFindings {
    pub traffic_switched: bool,
    pub stable_weight: u8,
    pub canary_weight: u8,
    pub increments: u32,
    pub mtls: bool,
    pub awaiting_promotion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub framework: String,
    pub control_id: String,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceFindings {
    /// Score per framework, 0-100
    pub framework_scores: BTreeMap<String, f64>,
    pub violations: Vec<ComplianceViolation>,
    pub overall_score: f64,
    pub threshold: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringFindings {
    pub dashboards: Vec<String>,
    pub alerts_created: usize,
    pub sla: Option<SlaSnapshot>,
}

/// Category of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Deployment,
    Security,
    ServiceMesh,
    Monitoring,
    Compliance,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Skipped,
}

/// One entry of the flat audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub category: AuditCategory,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Outcome of the rollback controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub triggered: bool,
    pub reason: String,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub restored_version: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Published record of one deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub deployment_id: String,
    pub name: String,
    pub version: String,
    pub strategy: Strategy,
    pub environment: String,
    pub region: String,
    pub status: DeploymentStatus,
    pub phase: Phase,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub manifest_digest: Option<String>,
    pub clusters: Vec<ClusterStatus>,
    pub security: Option<SecurityFindings>,
    pub service_mesh: Option<MeshFindings>,
    pub compliance: Option<ComplianceFindings>,
    pub monitoring: Option<MonitoringFindings>,
    pub audit_trail: Vec<AuditEntry>,
    pub rollback: Option<RollbackResult>,
    pub error: Option<String>,
}

impl DeploymentResult {
    /// Audit entries of one category
    pub fn audit_entries(&self, category: AuditCategory) -> impl Iterator<Item = &AuditEntry> {
        self.audit_trail
            .iter()
            .filter(move |entry| entry.category == category)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Mutable accumulator owned by exactly one executor run
#[derive(Debug)]
pub struct ResultAccumulator {
    result: DeploymentResult,
}

impl ResultAccumulator {
    pub fn new(
        deployment_id: &str,
        name: &str,
        version: &str,
        strategy: Strategy,
        environment: &str,
        region: &str,
    ) -> Self {
        Self {
            result: DeploymentResult {
                deployment_id: deployment_id.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                strategy,
                environment: environment.to_string(),
                region: region.to_string(),
                status: DeploymentStatus::InProgress,
                phase: Phase::Pending,
                start_time: Utc::now(),
                end_time: None,
                manifest_digest: None,
                clusters: Vec::new(),
                security: None,
                service_mesh: None,
                compliance: None,
                monitoring: None,
                audit_trail: Vec::new(),
                rollback: None,
                error: None,
            },
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.result.status
    }

    pub fn phase(&self) -> Phase {
        self.result.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.result.phase = phase;
    }

    pub fn set_status(&mut self, status: DeploymentStatus) -> Result<(), OrchestratorError> {
        if !self.result.status.can_transition_to(status) {
            return Err(OrchestratorError::Internal(format!(
                "invalid status transition {} -> {}",
                self.result.status, status
            )));
        }
        self.result.status = status;
        Ok(())
    }

    pub fn set_manifest_digest(&mut self, digest: String) {
        self.result.manifest_digest = Some(digest);
    }

    pub fn push_cluster(&mut self, cluster: ClusterStatus) {
        self.result.clusters.push(cluster);
    }

    pub fn clusters_mut(&mut self) -> &mut [ClusterStatus] {
        &mut self.result.clusters
    }

    pub fn set_security(&mut self, findings: SecurityFindings) {
        self.result.security = Some(findings);
    }

    pub fn set_service_mesh(&mut self, findings: MeshFindings) {
        self.result.service_mesh = Some(findings);
    }

    pub fn service_mesh(&self) -> Option<&MeshFindings> {
        self.result.service_mesh.as_ref()
    }

    pub fn set_compliance(&mut self, findings: ComplianceFindings) {
        self.result.compliance = Some(findings);
    }

    pub fn set_monitoring(&mut self, findings: MonitoringFindings) {
        self.result.monitoring = Some(findings);
    }

    pub fn set_rollback(&mut self, rollback: RollbackResult) {
        self.result.rollback = Some(rollback);
    }

    pub fn set_error(&mut self, error: String) {
        self.result.error = Some(error);
    }

    pub fn audit(
        &mut self,
        category: AuditCategory,
        action: impl Into<String>,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        self.result.audit_trail.push(AuditEntry {
            timestamp: Utc::now(),
            phase: self.result.phase,
            category,
            action: action.into(),
            outcome,
            details,
        });
    }

    /// Immutable copy of the current state
    pub fn snapshot(&self) -> DeploymentResult {
        self.result.clone()
    }

    /// Stamp the end time and publish. Consumes the accumulator so the end
    /// time can only be set once.
    pub fn finalize(mut self) -> DeploymentResult {
        self.result.end_time = Some(Utc::now());
        self.result
    }
}
