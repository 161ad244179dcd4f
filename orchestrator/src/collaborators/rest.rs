//! REST gateway implementing every collaborator over pooled HTTP clients

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::collaborators::types::*;
use crate::collaborators::{
    ComplianceManager, MonitoringManager, PlatformAdapter, SecurityManager, ServiceMeshManager,
};
use crate::errors::OrchestratorError;
use crate::models::{AlertRule, DashboardSpec};
use crate::pool::{ApiClient, ApiFamily, ConnectionPool, HttpClientFactory};

/// Collaborator gateway for the platform's REST endpoints
pub struct RestGateway {
    pool: Arc<ConnectionPool<HttpClientFactory>>,
}

#[derive(Deserialize)]
struct DashboardCreated {
    id: String,
}

impl RestGateway {
    pub fn new(pool: Arc<ConnectionPool<HttpClientFactory>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<HttpClientFactory>> {
        &self.pool
    }

    /// Borrow a client, run `f`, and hand the client back
    async fn call<T, F, Fut>(&self, family: ApiFamily, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(ApiClient) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let mut conn = self.pool.acquire(family).await?;
        let result = f(conn.client().clone()).await;
        if result.is_err() {
            conn.mark_error();
        }
        self.pool.release(conn).await;
        result
    }
}

#[async_trait]
impl PlatformAdapter for RestGateway {
    async fn deploy(
        &self,
        config: &PlatformDeployConfig,
    ) -> Result<PlatformDeployOutcome, OrchestratorError> {
        self.call(ApiFamily::Apps, |client| async move {
            client.post("deployments", config).await
        })
        .await
    }

    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<PlatformRollbackOutcome, OrchestratorError> {
        let path = format!("deployments/{}/{}/rollback", namespace, name);
        self.call(ApiFamily::Apps, |client| async move {
            client.post(&path, &json!({})).await
        })
        .await
    }

    async fn get_health_status(&self) -> Result<PlatformHealth, OrchestratorError> {
        self.call(ApiFamily::Core, |client| async move { client.get("health").await })
            .await
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl ServiceMeshManager for RestGateway {
    async fn configure_traffic_splitting(
        &self,
        split: &TrafficSplit,
    ) -> Result<(), OrchestratorError> {
        let path = format!("traffic-splits/{}/{}", split.namespace, split.service);
        self.call(ApiFamily::Networking, |client| async move {
            client.put_empty(&path, split).await
        })
        .await
    }

    async fn get_service_mesh_status(&self) -> Result<MeshStatus, OrchestratorError> {
        self.call(ApiFamily::Networking, |client| async move {
            client.get("mesh/status").await
        })
        .await
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl SecurityManager for RestGateway {
    async fn create_secret(&self, secret: &SecretRequest) -> Result<(), OrchestratorError> {
        let path = format!("namespaces/{}/secrets", secret.namespace);
        self.call(ApiFamily::Core, |client| async move {
            client.post_empty(&path, secret).await
        })
        .await
    }

    async fn get_security_health(&self) -> Result<SecurityHealth, OrchestratorError> {
        self.call(ApiFamily::Rbac, |client| async move {
            client.get("security/health").await
        })
        .await
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl ComplianceManager for RestGateway {
    async fn perform_compliance_assessment(
        &self,
        frameworks: &[String],
    ) -> Result<Vec<ComplianceReport>, OrchestratorError> {
        let body = json!({ "frameworks": frameworks });
        self.call(ApiFamily::Custom, |client| async move {
            client.post("compliance/assessments", &body).await
        })
        .await
    }

    async fn log_audit_event(&self, event: &AuditEvent) -> Result<(), OrchestratorError> {
        self.call(ApiFamily::Custom, |client| async move {
            client.post_empty("compliance/audit-events", event).await
        })
        .await
    }

    async fn get_compliance_health(&self) -> Result<ComplianceHealth, OrchestratorError> {
        self.call(ApiFamily::Custom, |client| async move {
            client.get("compliance/health").await
        })
        .await
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl MonitoringManager for RestGateway {
    async fn create_dashboard(&self, dashboard: &DashboardSpec) -> Result<String, OrchestratorError> {
        let created: DashboardCreated = self
            .call(ApiFamily::Custom, |client| async move {
                client.post("monitoring/dashboards", dashboard).await
            })
            .await?;
        Ok(created.id)
    }

    async fn add_alert_rule(&self, rule: &AlertRule) -> Result<(), OrchestratorError> {
        self.call(ApiFamily::Custom, |client| async move {
            client.post_empty("monitoring/alert-rules", rule).await
        })
        .await
    }

    async fn get_system_health(&self) -> Result<SystemHealth, OrchestratorError> {
        self.call(ApiFamily::Custom, |client| async move {
            client.get("monitoring/health").await
        })
        .await
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.pool.close();
        Ok(())
    }
}
