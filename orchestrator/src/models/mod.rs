//! Deployment request and result models

pub mod request;
pub mod result;

pub use request::{
    AlertRule, CanaryConfig, ComplianceConfig, DashboardSpec, DeploymentConfig,
    DeploymentRequest, MonitoringConfig, PanelSpec, SecretSpec, SecurityConfig,
    ServiceMeshConfig, SlaTargets, Strategy, Subsystem,
};
pub use result::{
    AuditCategory, AuditEntry, AuditOutcome, ClusterStatus, ComplianceFindings,
    ComplianceViolation, DeploymentResult, DeploymentStatus, MeshFindings, MonitoringFindings,
    ResultAccumulator, RollbackResult, SecurityFindings,
};
