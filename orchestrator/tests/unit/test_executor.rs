//! Phase executor tests against recording collaborators

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use api_models::HealthStatus;
use fabrollout::collaborators::Capabilities;
use fabrollout::deploy::fsm::Phase;
use fabrollout::errors::OrchestratorError;
use fabrollout::models::{AuditCategory, DeploymentStatus};
use fabrollout::state::LockType;

use crate::common::{
    canary_request, lock, orchestrator, rolling_request, CountingStore, RecordingPlatform,
    ScoredCompliance, ScriptedMesh,
};

#[tokio::test]
async fn test_rolling_deployment_without_optional_phases() {
    let platform = Arc::new(RecordingPlatform::default());
    let store = Arc::new(CountingStore::default());
    let orch = orchestrator(Capabilities::new(platform.clone()), store.clone());

    let result = orch.deploy(rolling_request("dep-1")).await.unwrap();

    assert_eq!(result.status, DeploymentStatus::Success);
    assert_eq!(result.phase, Phase::Completed);
    assert_eq!(result.clusters.len(), 1);
    assert_eq!(result.clusters[0].replicas_ready, 1);
    assert_eq!(result.clusters[0].services, vec!["analytics-svc".to_string()]);
    assert_eq!(result.audit_entries(AuditCategory::Compliance).count(), 0);
    assert!(result.security.is_none());
    assert!(result.service_mesh.is_none());
    assert!(result.manifest_digest.is_some());
    assert!(result.end_time.is_some());
    assert_eq!(platform.deploy_count(), 1);

    // workload labels carry the deployment id
    let deploys = lock(&platform.deploys);
    assert_eq!(deploys[0].labels["fabrollout/deployment-id"], "dep-1");
    drop(deploys);

    // one lock pair per run
    assert_eq!(store.acquired(LockType::Deployment), 1);
    assert_eq!(store.released(LockType::Deployment), 1);
    assert!(store.inner.holder("dep-1", LockType::Deployment).is_none());

    let persisted = orch.get_status("dep-1").await.unwrap().unwrap();
    assert_eq!(persisted.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_empty_id_is_rejected_before_locking() {
    let store = Arc::new(CountingStore::default());
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default())),
        store.clone(),
    );

    let err = orch.deploy(rolling_request("  ")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(store.acquired(LockType::Deployment), 0);
}

#[tokio::test(start_paused = true)]
async fn test_same_id_concurrently_contends() {
    let platform = Arc::new(RecordingPlatform::slow(Duration::from_secs(60)));
    let store = Arc::new(CountingStore::default());
    let orch = Arc::new(orchestrator(Capabilities::new(platform.clone()), store.clone()));

    let first = orch.submit(rolling_request("dep-1")).await.unwrap();

    let err = orch.deploy(rolling_request("dep-1")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::LockContention(ref id) if id == "dep-1"));
    assert_eq!(orch.metrics().snapshot().lock_contentions, 1);

    // other ids are independent
    let other = orch.deploy(rolling_request("dep-2")).await.unwrap();
    assert_eq!(other.status, DeploymentStatus::Success);

    let result = first.await.unwrap().unwrap();
    assert_eq!(result.status, DeploymentStatus::Success);
    assert_eq!(platform.deploy_count(), 2);
    assert_eq!(store.acquired(LockType::Deployment), 2);
    assert_eq!(store.released(LockType::Deployment), 2);

    // released lock admits the next run of the same id
    let again = orch.deploy(rolling_request("dep-1")).await.unwrap();
    assert_eq!(again.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_blocking_compliance_stops_before_deploy() {
    let platform = Arc::new(RecordingPlatform::default());
    let compliance = Arc::new(ScoredCompliance::new(&[("SOC2", 65.0)]));
    let store = Arc::new(CountingStore::default());
    let orch = orchestrator(
        Capabilities::new(platform.clone()).with_compliance(compliance.clone()),
        store.clone(),
    );

    let mut request = rolling_request("dep-1");
    request.config.compliance.enabled = true;
    request.config.compliance.blocking = true;
    request.config.compliance.frameworks = vec!["SOC2".to_string()];

    let err = orch.deploy(request).await.unwrap_err();
    match err {
        OrchestratorError::ComplianceBlocked { score, threshold } => {
            assert_eq!(score, 65.0);
            assert_eq!(threshold, 80.0);
        }
        other => panic!("expected compliance block, got {other:?}"),
    }

    assert_eq!(platform.deploy_count(), 0);
    assert_eq!(platform.rollbacks.load(Ordering::SeqCst), 0);

    let result = orch.get_status("dep-1").await.unwrap().unwrap();
    assert_eq!(result.status, DeploymentStatus::Failed);
    assert!(result.rollback.is_none());
    assert!(!result.compliance.unwrap().passed);
    assert_eq!(orch.metrics().snapshot().compliance_blocks, 1);
    assert_eq!(store.released(LockType::Deployment), 1);
}

#[tokio::test]
async fn test_advisory_compliance_logs_failure_and_continues() {
    let compliance = Arc::new(ScoredCompliance::new(&[("SOC2", 65.0), ("ISO27001", 85.0)]));
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default()))
            .with_compliance(compliance.clone()),
        Arc::new(CountingStore::default()),
    );

    let mut request = rolling_request("dep-1");
    request.config.compliance.enabled = true;
    request.config.compliance.frameworks = vec!["SOC2".to_string(), "ISO27001".to_string()];

    let result = orch.deploy(request).await.unwrap();
    assert_eq!(result.status, DeploymentStatus::Success);

    let findings = result.compliance.unwrap();
    assert_eq!(findings.overall_score, 75.0);
    assert!(!findings.passed);

    let events = lock(&compliance.events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, "fail");
    assert_eq!(events[0].deployment_id, "dep-1");
}

#[tokio::test]
async fn test_request_threshold_overrides_default() {
    let compliance = Arc::new(ScoredCompliance::new(&[("SOC2", 65.0)]));
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default()))
            .with_compliance(compliance.clone()),
        Arc::new(CountingStore::default()),
    );

    let mut request = rolling_request("dep-1");
    request.config.compliance.enabled = true;
    request.config.compliance.blocking = true;
    request.config.compliance.threshold = Some(60.0);
    request.config.compliance.frameworks = vec!["SOC2".to_string()];

    let result = orch.deploy(request).await.unwrap();
    assert_eq!(result.status, DeploymentStatus::Success);
    assert!(result.compliance.unwrap().passed);
}

#[tokio::test]
async fn test_unhealthy_platform_fails_without_rollback() {
    let platform = Arc::new(RecordingPlatform {
        unhealthy: true,
        ..RecordingPlatform::default()
    });
    let orch = orchestrator(
        Capabilities::new(platform.clone()),
        Arc::new(CountingStore::default()),
    );

    let err = orch.deploy(rolling_request("dep-1")).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Collaborator { ref collaborator, .. } if collaborator == "platform"
    ));
    assert_eq!(platform.deploy_count(), 0);

    let result = orch.get_status("dep-1").await.unwrap().unwrap();
    assert_eq!(result.status, DeploymentStatus::Failed);
    assert_eq!(result.phase, Phase::Failed);
    assert!(result.rollback.is_none());
    assert!(result.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_canary_breach_rolls_back() {
    let platform = Arc::new(RecordingPlatform::default());
    let mesh = Arc::new(ScriptedMesh::breaching_at(40));
    let store = Arc::new(CountingStore::default());
    let orch = orchestrator(
        Capabilities::new(platform.clone()).with_mesh(mesh.clone()),
        store.clone(),
    );

    let err = orch.deploy(canary_request("dep-1", 10, 30)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CanaryAborted { weight: 40, .. }));

    let result = orch.get_status("dep-1").await.unwrap().unwrap();
    assert_eq!(result.status, DeploymentStatus::RolledBack);
    assert_eq!(result.phase, Phase::Rollback);
    let rollback = result.rollback.as_ref().unwrap();
    assert!(rollback.success);
    assert_eq!(rollback.restored_version.as_deref(), Some("1.0.0"));
    assert_eq!(result.audit_entries(AuditCategory::Rollback).count(), 1);

    // traffic returned to the stable subset
    assert_eq!(mesh.canary_weights(), vec![10, 40, 0]);
    assert_eq!(platform.rollbacks.load(Ordering::SeqCst), 1);

    assert_eq!(store.acquired(LockType::Rollback), 1);
    assert_eq!(store.released(LockType::Rollback), 1);
    assert_eq!(store.released(LockType::Deployment), 1);

    let metrics = orch.metrics().snapshot();
    assert_eq!(metrics.canary_aborts, 1);
    assert_eq!(metrics.targets["production/primary"].rollbacks, 1);
}

#[tokio::test]
async fn test_shutdown_rejects_new_runs() {
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default())),
        Arc::new(CountingStore::default()),
    );

    orch.shutdown(Duration::from_secs(1)).await;
    assert!(!orch.is_accepting());

    let err = orch.deploy(rolling_request("dep-1")).await.unwrap_err();
    assert_eq!(err.kind(), "shutdown");
    assert_eq!(orch.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_in_flight_runs() {
    let platform = Arc::new(RecordingPlatform::slow(Duration::from_secs(30)));
    let orch = Arc::new(orchestrator(
        Capabilities::new(platform.clone()),
        Arc::new(CountingStore::default()),
    ));

    let handle = orch.submit(rolling_request("dep-1")).await.unwrap();
    assert_eq!(orch.in_flight(), 1);

    let snapshot = orch.shutdown(Duration::from_secs(120)).await;
    assert_eq!(orch.in_flight(), 0);
    assert_eq!(snapshot.targets["production/primary"].succeeded, 1);

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_system_health_follows_platform() {
    let healthy = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default())),
        Arc::new(CountingStore::default()),
    );
    let report = healthy.system_health("production").await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.accepting);

    let unhealthy = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform {
            unhealthy: true,
            ..RecordingPlatform::default()
        })),
        Arc::new(CountingStore::default()),
    );
    let report = unhealthy.system_health("production").await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_list_all_merges_store_and_index() {
    let store = Arc::new(CountingStore::default());
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default())),
        store.clone(),
    );

    orch.deploy(rolling_request("dep-1")).await.unwrap();
    orch.deploy(rolling_request("dep-2")).await.unwrap();

    let mut ids: Vec<String> = orch
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.deployment_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["dep-1".to_string(), "dep-2".to_string()]);
    assert!(orch
        .list_active()
        .iter()
        .all(|r| r.status == DeploymentStatus::Success));
}
