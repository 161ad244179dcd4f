//! Data exchanged with the collaborator subsystems

use std::collections::BTreeMap;

use api_models::HealthStatus;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::models::request::SecretSpec;
use crate::models::Strategy;

/// Workload handed to the platform adapter
#[derive(Debug, Clone, Serialize)]
pub struct PlatformDeployConfig {
    pub deployment_id: String,
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub region: String,
    pub strategy: Strategy,
    pub replicas: u32,
    pub manifest: serde_json::Value,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
    Deployed,
    Progressing,
    Failed,
}

impl WorkloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadState::Deployed => "deployed",
            WorkloadState::Progressing => "progressing",
            WorkloadState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    #[serde(default)]
    pub restarts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn new(name: impl Into<String>, passed: bool, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaCounts {
    pub desired: u32,
    pub ready: u32,
}

/// What the platform reports after applying a workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformDeployOutcome {
    pub cluster: String,
    pub status: WorkloadState,
    #[serde(default)]
    pub replicas: ReplicaCounts,
    #[serde(default)]
    pub pods: Vec<PodStatus>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
}

/// Platform-wide health view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub pods: Vec<PodStatus>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of reverting a workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRollbackOutcome {
    pub restored_version: Option<String>,
}

/// One weighted destination of a traffic split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSubset {
    pub name: String,
    pub version: String,
    pub weight: u8,
}

/// Full traffic split for one service
#[derive(Debug, Clone, Serialize)]
pub struct TrafficSplit {
    pub service: String,
    pub namespace: String,
    pub subsets: Vec<TrafficSubset>,
    pub mtls: bool,
}

impl TrafficSplit {
    /// `stable` and `canary` subsets whose weights sum to 100
    pub fn canary(
        service: &str,
        namespace: &str,
        stable_version: &str,
        canary_version: &str,
        canary_weight: u8,
        mtls: bool,
    ) -> Self {
        let canary_weight = canary_weight.min(100);
        Self {
            service: service.to_string(),
            namespace: namespace.to_string(),
            subsets: vec![
                TrafficSubset {
                    name: STABLE_SUBSET.to_string(),
                    version: stable_version.to_string(),
                    weight: 100 - canary_weight,
                },
                TrafficSubset {
                    name: CANARY_SUBSET.to_string(),
                    version: canary_version.to_string(),
                    weight: canary_weight,
                },
            ],
            mtls,
        }
    }

    pub fn weight_of(&self, subset: &str) -> Option<u8> {
        self.subsets
            .iter()
            .find(|s| s.name == subset)
            .map(|s| s.weight)
    }
}

pub const STABLE_SUBSET: &str = "stable";
pub const CANARY_SUBSET: &str = "canary";

/// Live metrics of one traffic subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetMetrics {
    pub name: String,
    pub weight: u8,
    #[serde(default)]
    pub request_count: u64,
    /// Percent, 0-100
    pub error_rate: f64,
    /// Percent, 0-100
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMeshEntry {
    pub service: String,
    pub namespace: String,
    #[serde(default)]
    pub subsets: Vec<SubsetMetrics>,
}

/// Mesh-wide status, including per-service subset metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshStatus {
    pub status: HealthStatus,
    #[serde(default)]
    pub services: Vec<ServiceMeshEntry>,
    #[serde(default)]
    pub message: Option<String>,
}

impl MeshStatus {
    pub fn subset(&self, service: &str, namespace: &str, subset: &str) -> Option<&SubsetMetrics> {
        self.services
            .iter()
            .find(|entry| entry.service == service && entry.namespace == namespace)
            .and_then(|entry| entry.subsets.iter().find(|s| s.name == subset))
    }
}

/// Secret as sent to the security manager, values base64-encoded
#[derive(Clone, Serialize)]
pub struct SecretRequest {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    pub data: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl SecretRequest {
    pub fn from_spec(spec: &SecretSpec, namespace: &str, deployment: &str) -> Self {
        let data = spec
            .data
            .iter()
            .map(|(key, value)| (key.clone(), BASE64.encode(value.expose_secret().as_bytes())))
            .collect();
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/managed-by".to_string(), "fabrollout".to_string());
        labels.insert("fabrollout/deployment".to_string(), deployment.to_string());
        Self {
            name: spec.name.clone(),
            namespace: namespace.to_string(),
            secret_type: spec.secret_type.clone(),
            data,
            labels,
        }
    }
}

impl std::fmt::Debug for SecretRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRequest")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("secret_type", &self.secret_type)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    pub target: String,
    #[serde(default)]
    pub critical: u32,
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
    #[serde(default)]
    pub low: u32,
}

/// Security posture reported by the security manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub vulnerability_reports: Vec<VulnerabilityReport>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One failing control in a framework assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlGap {
    pub control_id: String,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub framework: String,
    /// 0-100
    pub score: f64,
    #[serde(default)]
    pub gaps: Vec<ControlGap>,
}

/// Event appended to the compliance audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub deployment_id: String,
    pub action: String,
    pub actor: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Observed service levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaSnapshot {
    pub availability: f64,
    pub latency_p95_ms: f64,
    pub error_rate: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub sla: Option<SlaSnapshot>,
    #[serde(default)]
    pub message: Option<String>,
}
