//! Deployment request models

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Rollout strategy requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Rolling,
    BlueGreen,
    Canary,
    Recreate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Rolling => "rolling",
            Strategy::BlueGreen => "blue_green",
            Strategy::Canary => "canary",
            Strategy::Recreate => "recreate",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional subsystems a request can enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Security,
    ServiceMesh,
    Monitoring,
    Compliance,
}

impl Subsystem {
    pub const ALL: [Subsystem; 4] = [
        Subsystem::Security,
        Subsystem::ServiceMesh,
        Subsystem::Monitoring,
        Subsystem::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Security => "security",
            Subsystem::ServiceMesh => "service_mesh",
            Subsystem::Monitoring => "monitoring",
            Subsystem::Compliance => "compliance",
        }
    }
}

/// A deployment request submitted by a caller. Never mutated after submission.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRequest {
    /// Deployment id, also the lock key
    pub id: String,

    /// Target workload name
    pub name: String,

    /// Target workload version
    pub version: String,

    /// Workload manifest, opaque to the orchestrator
    #[serde(default)]
    pub manifest: serde_json::Value,

    /// Configuration tree
    #[serde(default)]
    pub config: DeploymentConfig,
}

impl DeploymentRequest {
    /// Create a request with default configuration
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        manifest: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            manifest,
            config: DeploymentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DeploymentConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether an optional subsystem is switched on for this request
    pub fn is_enabled(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Security => self.config.security.enabled,
            Subsystem::ServiceMesh => self.config.service_mesh.enabled,
            Subsystem::Monitoring => self.config.monitoring.enabled,
            Subsystem::Compliance => self.config.compliance.enabled,
        }
    }

    /// Whether the canary controller drives the mesh phase
    pub fn uses_canary(&self) -> bool {
        self.config.strategy == Strategy::Canary
            && self.config.service_mesh.enabled
            && self.config.service_mesh.traffic_splitting
    }

    /// Reject requests the executor cannot run
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let required = [
            ("id", &self.id),
            ("name", &self.name),
            ("version", &self.version),
            ("namespace", &self.config.namespace),
            ("environment", &self.config.environment),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrchestratorError::Validation(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if self.manifest.is_null() {
            return Err(OrchestratorError::Validation(
                "manifest must be provided".to_string(),
            ));
        }

        if self.config.replicas == 0 {
            return Err(OrchestratorError::Validation(
                "replicas must be at least 1".to_string(),
            ));
        }

        if self.uses_canary() {
            self.config.service_mesh.canary.validate()?;
        }

        let security = &self.config.security;
        if security.enabled {
            for secret in &security.secrets {
                if secret.name.trim().is_empty() {
                    return Err(OrchestratorError::Validation(
                        "secret name must not be empty".to_string(),
                    ));
                }
            }
        }

        let compliance = &self.config.compliance;
        if compliance.enabled {
            if compliance.frameworks.is_empty() {
                return Err(OrchestratorError::Validation(
                    "compliance enabled without frameworks".to_string(),
                ));
            }
            if let Some(threshold) = compliance.threshold {
                if !(0.0..=100.0).contains(&threshold) {
                    return Err(OrchestratorError::Validation(format!(
                        "compliance threshold {} outside 0-100",
                        threshold
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Deployment configuration tree
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Run the rollback controller when a phase fails
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub service_mesh: ServiceMeshConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub compliance: ComplianceConfig,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_region() -> String {
    "primary".to_string()
}

fn default_replicas() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            environment: default_environment(),
            namespace: default_namespace(),
            region: default_region(),
            replicas: default_replicas(),
            rollback_on_failure: true,
            security: SecurityConfig::default(),
            service_mesh: ServiceMeshConfig::default(),
            monitoring: MonitoringConfig::default(),
            compliance: ComplianceConfig::default(),
        }
    }
}

/// Security hardening settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub secrets: Vec<SecretSpec>,

    /// Bind the workload to a least-privilege service account
    #[serde(default)]
    pub rbac: bool,

    /// Names of network policies applied alongside the workload
    #[serde(default)]
    pub network_policies: Vec<String>,

    #[serde(default)]
    pub vulnerability_scan: bool,
}

/// A secret to be created by the security manager
#[derive(Debug, Clone, Deserialize)]
pub struct SecretSpec {
    pub name: String,

    #[serde(default = "default_secret_type")]
    pub secret_type: String,

    #[serde(default)]
    pub data: BTreeMap<String, SecretString>,
}

fn default_secret_type() -> String {
    "Opaque".to_string()
}

/// Service mesh settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMeshConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub traffic_splitting: bool,

    #[serde(default)]
    pub mtls: bool,

    #[serde(default)]
    pub canary: CanaryConfig,
}

/// Canary ramp parameters. Rates are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryConfig {
    #[serde(default = "default_initial_weight")]
    pub initial_weight: u8,

    #[serde(default = "default_step")]
    pub step: u8,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    #[serde(default = "default_true")]
    pub auto_promote: bool,

    /// Explicit deadline for the whole ramp
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// Consecutive steps allowed to report no canary metrics before the ramp
    /// is aborted
    #[serde(default = "default_missing_metrics_grace")]
    pub missing_metrics_grace: u32,
}

fn default_initial_weight() -> u8 {
    10
}

fn default_step() -> u8 {
    10
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_error_rate() -> f64 {
    5.0
}

fn default_min_success_rate() -> f64 {
    95.0
}

fn default_missing_metrics_grace() -> u32 {
    1
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            initial_weight: default_initial_weight(),
            step: default_step(),
            interval_secs: default_interval_secs(),
            max_error_rate: default_max_error_rate(),
            min_success_rate: default_min_success_rate(),
            auto_promote: true,
            max_duration_secs: None,
            missing_metrics_grace: default_missing_metrics_grace(),
        }
    }
}

impl CanaryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Number of increments needed to go from the initial weight to 100
    pub fn increments_to_full(&self) -> u32 {
        let remaining = 100u32.saturating_sub(self.initial_weight as u32);
        let step = self.step.max(1) as u32;
        remaining.div_ceil(step)
    }

    /// Deadline for the ramp: explicit when configured, otherwise twice the
    /// step/interval bound
    pub fn deadline(&self) -> Duration {
        match self.max_duration_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.interval() * self.increments_to_full().max(1) * 2,
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.step == 0 || self.step > 100 {
            return Err(OrchestratorError::Validation(format!(
                "canary step {} outside 1-100",
                self.step
            )));
        }
        if self.initial_weight >= 100 {
            return Err(OrchestratorError::Validation(format!(
                "canary initial weight {} must be below 100",
                self.initial_weight
            )));
        }
        if !(0.0..=100.0).contains(&self.max_error_rate)
            || !(0.0..=100.0).contains(&self.min_success_rate)
        {
            return Err(OrchestratorError::Validation(
                "canary thresholds must be percentages".to_string(),
            ));
        }
        Ok(())
    }
}

/// Monitoring settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Dashboards to create; an empty list creates the default dashboard
    #[serde(default)]
    pub dashboards: Vec<DashboardSpec>,

    /// Alert rules to register; an empty list registers the default set
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,

    #[serde(default)]
    pub sla: SlaTargets,
}

/// Dashboard definition handed to the monitoring manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSpec {
    pub title: String,

    #[serde(default)]
    pub panels: Vec<PanelSpec>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// One chart on a dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub title: String,
    pub query: String,
    #[serde(default = "default_panel_kind")]
    pub kind: String,
}

fn default_panel_kind() -> String {
    "timeseries".to_string()
}

/// Alert rule handed to the monitoring manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub expression: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub for_secs: u64,
}

fn default_severity() -> String {
    "warning".to_string()
}

/// Service-level targets tracked by monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaTargets {
    #[serde(default = "default_availability")]
    pub availability: f64,
    #[serde(default = "default_latency_p95_ms")]
    pub latency_p95_ms: f64,
    #[serde(default = "default_max_error_rate")]
    pub error_rate: f64,
}

fn default_availability() -> f64 {
    99.9
}

fn default_latency_p95_ms() -> f64 {
    500.0
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            availability: default_availability(),
            latency_p95_ms: default_latency_p95_ms(),
            error_rate: default_max_error_rate(),
        }
    }
}

/// Compliance validation settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Frameworks to assess, e.g. `SOC2`, `ISO27001`
    #[serde(default)]
    pub frameworks: Vec<String>,

    /// Abort the deployment when the score is below the threshold
    #[serde(default)]
    pub blocking: bool,

    /// Per-request override of the blocking threshold
    #[serde(default)]
    pub threshold: Option<f64>,
}
