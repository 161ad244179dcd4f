//! Rollback controller
//!
//! Best effort: every step runs even when an earlier one failed, and failures
//! are reported in the [`RollbackResult`] instead of being returned.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::collaborators::{Capabilities, TrafficSplit};
use crate::deploy::canary::STABLE_VERSION;
use crate::models::{DeploymentRequest, RollbackResult};
use crate::resilience::Resilience;

pub struct RollbackController<'a> {
    capabilities: &'a Capabilities,
    resilience: &'a Resilience,
}

impl<'a> RollbackController<'a> {
    pub fn new(capabilities: &'a Capabilities, resilience: &'a Resilience) -> Self {
        Self {
            capabilities,
            resilience,
        }
    }

    pub async fn rollback(
        &self,
        deployment_id: &str,
        request: &DeploymentRequest,
        reason: &str,
    ) -> RollbackResult {
        let environment = &request.config.environment;
        let namespace = &request.config.namespace;
        let mut errors = Vec::new();
        warn!(deployment_id, reason, "rolling back deployment");

        let platform = &self.capabilities.platform;
        let restored_version = match self
            .resilience
            .call(environment, "platform.rollback", || {
                platform.rollback(&request.name, namespace)
            })
            .await
        {
            Ok(outcome) => outcome.restored_version,
            Err(e) => {
                error!(deployment_id, error = %e, "platform rollback failed");
                errors.push(format!("platform: {}", e));
                None
            }
        };

        if request.config.service_mesh.enabled {
            let split = TrafficSplit::canary(
                &request.name,
                namespace,
                STABLE_VERSION,
                &request.version,
                0,
                request.config.service_mesh.mtls,
            );
            let mesh = &self.capabilities.mesh;
            if let Err(e) = self
                .resilience
                .call(environment, "mesh.configure_traffic_splitting", || {
                    mesh.configure_traffic_splitting(&split)
                })
                .await
            {
                error!(deployment_id, error = %e, "traffic reset failed");
                errors.push(format!("service mesh: {}", e));
            }
        }

        let success = errors.is_empty();
        info!(deployment_id, success, "rollback finished");
        RollbackResult {
            triggered: true,
            reason: reason.to_string(),
            completed_at: Utc::now(),
            success,
            restored_version,
            errors,
        }
    }
}
