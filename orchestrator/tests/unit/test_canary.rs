//! Canary ramp tests. Time is paused so ramp intervals pass instantly.

use std::sync::Arc;
use std::time::Duration;

use fabrollout::collaborators::{Capabilities, ServiceMeshManager};
use fabrollout::deploy::canary::CanaryController;
use fabrollout::errors::OrchestratorError;
use fabrollout::models::{DeploymentStatus, MeshFindings};
use tokio::time::Instant;

use crate::common::{
    canary_request, fast_resilience, orchestrator, CountingStore, RecordingPlatform, ScriptedMesh,
};

#[tokio::test(start_paused = true)]
async fn test_healthy_canary_ramps_to_full() {
    let scripted = Arc::new(ScriptedMesh::healthy());
    let mesh: Arc<dyn ServiceMeshManager> = scripted.clone();
    let resilience = fast_resilience();
    let request = canary_request("dep-1", 10, 30);
    let mut findings = MeshFindings::default();

    let started = Instant::now();
    CanaryController::new(&mesh, &resilience)
        .run(&request, &mut findings)
        .await
        .unwrap();

    assert_eq!(findings.increments, 3);
    assert!(findings.traffic_switched);
    assert_eq!(findings.canary_weight, 100);
    assert_eq!(findings.stable_weight, 0);
    assert!(!findings.awaiting_promotion);
    assert_eq!(scripted.canary_weights(), vec![10, 40, 70, 100]);
    assert!(started.elapsed() >= Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn test_every_split_sums_to_hundred() {
    let scripted = Arc::new(ScriptedMesh::healthy());
    let mesh: Arc<dyn ServiceMeshManager> = scripted.clone();
    let resilience = fast_resilience();
    let request = canary_request("dep-1", 5, 25);

    CanaryController::new(&mesh, &resilience)
        .run(&request, &mut MeshFindings::default())
        .await
        .unwrap();

    let splits = scripted.splits.lock().unwrap();
    assert_eq!(splits.len(), 5);
    for split in splits.iter() {
        let total: u32 = split.subsets.iter().map(|s| s.weight as u32).sum();
        assert_eq!(total, 100);
    }
}

#[tokio::test(start_paused = true)]
async fn test_manual_promotion_stops_short_of_full() {
    let scripted = Arc::new(ScriptedMesh::healthy());
    let mesh: Arc<dyn ServiceMeshManager> = scripted.clone();
    let resilience = fast_resilience();
    let mut request = canary_request("dep-1", 10, 30);
    request.config.service_mesh.canary.auto_promote = false;
    let mut findings = MeshFindings::default();

    CanaryController::new(&mesh, &resilience)
        .run(&request, &mut findings)
        .await
        .unwrap();

    assert!(findings.awaiting_promotion);
    assert!(!findings.traffic_switched);
    assert_eq!(findings.canary_weight, 70);
    assert_eq!(scripted.canary_weights(), vec![10, 40, 70]);
}

#[tokio::test(start_paused = true)]
async fn test_breach_aborts_at_current_weight() {
    let scripted = Arc::new(ScriptedMesh::breaching_at(70));
    let mesh: Arc<dyn ServiceMeshManager> = scripted.clone();
    let resilience = fast_resilience();
    let request = canary_request("dep-1", 10, 30);
    let mut findings = MeshFindings::default();

    let err = CanaryController::new(&mesh, &resilience)
        .run(&request, &mut findings)
        .await
        .unwrap_err();

    match err {
        OrchestratorError::CanaryAborted { weight, reason } => {
            assert_eq!(weight, 70);
            assert!(reason.contains("error rate"));
        }
        other => panic!("expected canary abort, got {other:?}"),
    }
    assert_eq!(findings.canary_weight, 70);
    assert!(!findings.traffic_switched);
}

#[tokio::test(start_paused = true)]
async fn test_missing_metrics_abort_after_grace() {
    let scripted = Arc::new(ScriptedMesh::silent());
    let mesh: Arc<dyn ServiceMeshManager> = scripted.clone();
    let resilience = fast_resilience();
    let request = canary_request("dep-1", 10, 30);

    let err = CanaryController::new(&mesh, &resilience)
        .run(&request, &mut MeshFindings::default())
        .await
        .unwrap_err();

    // one silent step is tolerated, the second aborts
    match err {
        OrchestratorError::CanaryAborted { weight, reason } => {
            assert_eq!(weight, 70);
            assert!(reason.contains("no canary metrics"));
        }
        other => panic!("expected canary abort, got {other:?}"),
    }
    assert_eq!(scripted.canary_weights(), vec![10, 40, 70]);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_aborts_ramp() {
    let scripted = Arc::new(ScriptedMesh::healthy());
    let mesh: Arc<dyn ServiceMeshManager> = scripted.clone();
    let resilience = fast_resilience();
    let mut request = canary_request("dep-1", 10, 30);
    request.config.service_mesh.canary.max_duration_secs = Some(45);

    let err = CanaryController::new(&mesh, &resilience)
        .run(&request, &mut MeshFindings::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::CanaryAborted { weight: 40, ref reason } if reason.contains("deadline")
    ));
    assert_eq!(scripted.canary_weights(), vec![10, 40]);
}

#[tokio::test(start_paused = true)]
async fn test_canary_deployment_end_to_end() {
    let mesh = Arc::new(ScriptedMesh::healthy());
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default())).with_mesh(mesh.clone()),
        Arc::new(CountingStore::default()),
    );

    let result = orch.deploy(canary_request("dep-1", 10, 30)).await.unwrap();

    assert_eq!(result.status, DeploymentStatus::Success);
    let findings = result.service_mesh.unwrap();
    assert_eq!(findings.increments, 3);
    assert!(findings.traffic_switched);
    assert_eq!((findings.stable_weight, findings.canary_weight), (0, 100));
    assert!(result.rollback.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_awaiting_promotion_is_partial() {
    let mesh = Arc::new(ScriptedMesh::healthy());
    let orch = orchestrator(
        Capabilities::new(Arc::new(RecordingPlatform::default())).with_mesh(mesh.clone()),
        Arc::new(CountingStore::default()),
    );
    let mut request = canary_request("dep-1", 10, 30);
    request.config.service_mesh.canary.auto_promote = false;

    let result = orch.deploy(request).await.unwrap();
    assert_eq!(result.status, DeploymentStatus::Partial);
    assert!(result.service_mesh.unwrap().awaiting_promotion);
}
