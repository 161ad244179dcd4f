//! Finite state machine over the deployment phases

use serde::{Deserialize, Serialize};

/// Deployment phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Accepted, no phase entered yet
    Pending,
    PreValidation,
    SecuritySetup,
    CoreDeployment,
    ServiceMesh,
    MonitoringSetup,
    ComplianceValidation,
    PostDeployment,
    FinalValidation,
    Completed,
    Failed,
    Rollback,
}

impl Phase {
    /// Working phases in execution order
    pub const ORDER: [Phase; 8] = [
        Phase::PreValidation,
        Phase::SecuritySetup,
        Phase::CoreDeployment,
        Phase::ServiceMesh,
        Phase::MonitoringSetup,
        Phase::ComplianceValidation,
        Phase::PostDeployment,
        Phase::FinalValidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::PreValidation => "pre_validation",
            Phase::SecuritySetup => "security_setup",
            Phase::CoreDeployment => "core_deployment",
            Phase::ServiceMesh => "service_mesh",
            Phase::MonitoringSetup => "monitoring_setup",
            Phase::ComplianceValidation => "compliance_validation",
            Phase::PostDeployment => "post_deployment",
            Phase::FinalValidation => "final_validation",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Rollback => "rollback",
        }
    }

    /// Position in [`Phase::ORDER`]
    fn rank(&self) -> Option<usize> {
        Self::ORDER.iter().position(|p| p == self)
    }

    /// Phases that only run when their subsystem is enabled
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Phase::SecuritySetup
                | Phase::ServiceMesh
                | Phase::MonitoringSetup
                | Phase::ComplianceValidation
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Rollback)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase event
#[derive(Debug, Clone)]
pub enum PhaseEvent {
    /// Enter the given working phase
    Enter(Phase),

    /// Every phase done
    Complete,

    /// The current phase failed
    Fail(String),

    /// Start reverting after a failure
    Rollback,
}

/// Enforces the phase order of one run
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
    failed_in: Option<Phase>,
    error: Option<String>,
    visited: Vec<Phase>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Pending,
            failed_in: None,
            error: None,
            visited: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Phase that was active when the run failed
    pub fn failed_in(&self) -> Option<Phase> {
        self.failed_in
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether `phase` was entered during this run
    pub fn has_entered(&self, phase: Phase) -> bool {
        self.visited.contains(&phase)
    }

    /// Whether moving from `from` to `to` skips only optional phases
    fn may_enter(from: Phase, to: Phase) -> bool {
        let Some(to_rank) = to.rank() else {
            return false;
        };
        let from_rank = match from {
            Phase::Pending => None,
            other => match other.rank() {
                Some(rank) => Some(rank),
                None => return false,
            },
        };
        let start = from_rank.map(|r| r + 1).unwrap_or(0);
        if to_rank < start {
            return false;
        }
        Phase::ORDER[start..to_rank].iter().all(Phase::is_optional)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PhaseEvent) -> Result<(), String> {
        let next = match (self.phase, &event) {
            (current, PhaseEvent::Enter(to)) if Self::may_enter(current, *to) => {
                self.visited.push(*to);
                *to
            }
            (Phase::FinalValidation, PhaseEvent::Complete) => Phase::Completed,
            (current, PhaseEvent::Fail(err)) if !current.is_terminal() => {
                self.failed_in = Some(current);
                self.error = Some(err.clone());
                Phase::Failed
            }
            (Phase::Failed, PhaseEvent::Rollback) => Phase::Rollback,
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.phase = next;
        Ok(())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
