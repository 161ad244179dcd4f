//! Security and compliance scoring

use serde::{Deserialize, Serialize};

use crate::collaborators::{ComplianceReport, VulnerabilityReport};
use crate::models::{ComplianceFindings, ComplianceViolation};

/// Penalties subtracted from a perfect security score, and the default
/// compliance gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_rbac_missing")]
    pub rbac_missing: u32,

    #[serde(default = "default_no_network_policies")]
    pub no_network_policies: u32,

    /// Per critical vulnerability
    #[serde(default = "default_critical_vulnerability")]
    pub critical_vulnerability: u32,

    /// Per high vulnerability
    #[serde(default = "default_high_vulnerability")]
    pub high_vulnerability: u32,

    #[serde(default = "default_scan_disabled")]
    pub scan_disabled: u32,

    #[serde(default = "default_compliance_threshold")]
    pub compliance_threshold: f64,
}

fn default_rbac_missing() -> u32 {
    20
}

fn default_no_network_policies() -> u32 {
    15
}

fn default_critical_vulnerability() -> u32 {
    10
}

fn default_high_vulnerability() -> u32 {
    5
}

fn default_scan_disabled() -> u32 {
    10
}

fn default_compliance_threshold() -> f64 {
    80.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rbac_missing: default_rbac_missing(),
            no_network_policies: default_no_network_policies(),
            critical_vulnerability: default_critical_vulnerability(),
            high_vulnerability: default_high_vulnerability(),
            scan_disabled: default_scan_disabled(),
            compliance_threshold: default_compliance_threshold(),
        }
    }
}

/// Security posture inputs
pub struct SecurityPosture<'a> {
    pub rbac: bool,
    pub network_policies: usize,
    pub vulnerability_scan: bool,
    pub reports: &'a [VulnerabilityReport],
}

/// 100 minus penalties, clamped to 0-100
pub fn security_score(config: &ScoringConfig, posture: &SecurityPosture<'_>) -> u8 {
    let mut penalty: u64 = 0;
    if !posture.rbac {
        penalty += u64::from(config.rbac_missing);
    }
    if posture.network_policies == 0 {
        penalty += u64::from(config.no_network_policies);
    }
    if posture.vulnerability_scan {
        for report in posture.reports {
            penalty += u64::from(report.critical) * u64::from(config.critical_vulnerability);
            penalty += u64::from(report.high) * u64::from(config.high_vulnerability);
        }
    } else {
        penalty += u64::from(config.scan_disabled);
    }
    100u64.saturating_sub(penalty) as u8
}

/// Fold framework reports into findings. The overall score is the mean of
/// the framework scores; no reports counts as fully compliant.
pub fn aggregate_compliance(reports: &[ComplianceReport], threshold: f64) -> ComplianceFindings {
    let framework_scores = reports
        .iter()
        .map(|r| (r.framework.clone(), r.score.clamp(0.0, 100.0)))
        .collect::<std::collections::BTreeMap<_, _>>();

    let overall_score = if framework_scores.is_empty() {
        100.0
    } else {
        framework_scores.values().sum::<f64>() / framework_scores.len() as f64
    };

    let violations = reports
        .iter()
        .flat_map(|report| {
            report.gaps.iter().map(move |gap| ComplianceViolation {
                framework: report.framework.clone(),
                control_id: gap.control_id.clone(),
                severity: gap.severity,
                description: gap.description.clone(),
            })
        })
        .collect();

    ComplianceFindings {
        framework_scores,
        violations,
        overall_score,
        threshold,
        passed: overall_score >= threshold,
    }
}
