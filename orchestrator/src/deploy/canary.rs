//! Canary traffic controller
//!
//! Ramps the canary subset's weight from its initial value to 100 in fixed
//! steps, reading live subset metrics after every push and aborting when the
//! error or success rate crosses its threshold.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::collaborators::{ServiceMeshManager, TrafficSplit, CANARY_SUBSET};
use crate::errors::OrchestratorError;
use crate::models::{DeploymentRequest, MeshFindings};
use crate::resilience::Resilience;

/// Version label of the stable subset
pub const STABLE_VERSION: &str = "current";

pub struct CanaryController<'a> {
    mesh: &'a Arc<dyn ServiceMeshManager>,
    resilience: &'a Resilience,
}

impl<'a> CanaryController<'a> {
    pub fn new(mesh: &'a Arc<dyn ServiceMeshManager>, resilience: &'a Resilience) -> Self {
        Self { mesh, resilience }
    }

    async fn push(&self, request: &DeploymentRequest, weight: u8) -> Result<(), OrchestratorError> {
        let split = TrafficSplit::canary(
            &request.name,
            &request.config.namespace,
            STABLE_VERSION,
            &request.version,
            weight,
            request.config.service_mesh.mtls,
        );
        self.resilience
            .call(
                &request.config.environment,
                "mesh.configure_traffic_splitting",
                || self.mesh.configure_traffic_splitting(&split),
            )
            .await
    }

    /// Abort reason when the canary subset breaches a threshold. `unseen`
    /// counts consecutive steps that reported no canary metrics.
    async fn check_metrics(
        &self,
        request: &DeploymentRequest,
        unseen: &mut u32,
    ) -> Result<Option<String>, OrchestratorError> {
        let canary = &request.config.service_mesh.canary;
        let status = self
            .resilience
            .call(
                &request.config.environment,
                "mesh.get_service_mesh_status",
                || self.mesh.get_service_mesh_status(),
            )
            .await?;

        let Some(metrics) = status.subset(&request.name, &request.config.namespace, CANARY_SUBSET)
        else {
            *unseen += 1;
            warn!(deployment_id = %request.id, steps = *unseen, "no canary metrics reported");
            if *unseen > canary.missing_metrics_grace {
                return Ok(Some(format!(
                    "no canary metrics for {} consecutive steps",
                    unseen
                )));
            }
            return Ok(None);
        };
        *unseen = 0;

        if metrics.error_rate > canary.max_error_rate {
            return Ok(Some(format!(
                "error rate {:.2}% above {:.2}%",
                metrics.error_rate, canary.max_error_rate
            )));
        }
        if metrics.success_rate < canary.min_success_rate {
            return Ok(Some(format!(
                "success rate {:.2}% below {:.2}%",
                metrics.success_rate, canary.min_success_rate
            )));
        }
        Ok(None)
    }

    /// Run the ramp, keeping `findings` current after every push
    pub async fn run(
        &self,
        request: &DeploymentRequest,
        findings: &mut MeshFindings,
    ) -> Result<(), OrchestratorError> {
        let canary = &request.config.service_mesh.canary;
        let started = Instant::now();
        let deadline = canary.deadline();

        let mut weight = canary.initial_weight.min(100);
        let mut unseen = 0;
        self.push(request, weight).await?;
        record(findings, weight);
        info!(deployment_id = %request.id, weight, "canary started");

        while weight < 100 {
            let next = weight.saturating_add(canary.step).min(100);
            if next == 100 && !canary.auto_promote {
                findings.awaiting_promotion = true;
                info!(deployment_id = %request.id, weight, "canary awaiting promotion");
                return Ok(());
            }

            if started.elapsed() + canary.interval() > deadline {
                return Err(OrchestratorError::CanaryAborted {
                    weight,
                    reason: format!("ramp exceeded its {}s deadline", deadline.as_secs()),
                });
            }
            tokio::time::sleep(canary.interval()).await;

            weight = next;
            self.push(request, weight).await?;
            record(findings, weight);
            findings.increments += 1;

            if let Some(reason) = self.check_metrics(request, &mut unseen).await? {
                warn!(deployment_id = %request.id, weight, %reason, "canary threshold breached");
                return Err(OrchestratorError::CanaryAborted { weight, reason });
            }
            info!(deployment_id = %request.id, weight, increments = findings.increments, "canary weight increased");
        }

        findings.traffic_switched = true;
        Ok(())
    }
}

fn record(findings: &mut MeshFindings, weight: u8) {
    findings.canary_weight = weight;
    findings.stable_weight = 100 - weight;
}
