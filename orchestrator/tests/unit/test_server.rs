//! HTTP surface tests driven through the router

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use fabrollout::collaborators::Capabilities;
use fabrollout::server::serve::router;
use fabrollout::server::state::ServerState;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::{orchestrator, CountingStore, RecordingPlatform};

fn app(platform: RecordingPlatform) -> Router {
    let orch = Arc::new(orchestrator(
        Capabilities::new(Arc::new(platform)),
        Arc::new(CountingStore::default()),
    ));
    router(Arc::new(ServerState::new(orch, None, "production")))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_deployment(query: &str, body: Value) -> Request<Body> {
    Request::post(format!("/deployments{query}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn deployment_body(id: &str) -> Value {
    json!({
        "id": id,
        "name": "line-analytics",
        "version": "1.4.0",
        "manifest": {"kind": "Deployment"}
    })
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = app(RecordingPlatform::default());
    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["accepting"], true);
    assert!(body["components"].as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn test_unhealthy_platform_answers_503() {
    let app = app(RecordingPlatform {
        unhealthy: true,
        ..RecordingPlatform::default()
    });
    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_deploy_and_fetch_result() {
    let app = app(RecordingPlatform::default());

    let (status, body) = send(&app, post_deployment("?wait=true", deployment_body("dep-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["deployment_id"], "dep-1");

    let (status, body) = send(
        &app,
        Request::get("/deployments/dep-1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");

    let (status, body) = send(&app, Request::get("/deployments").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_async_deploy_is_accepted() {
    let app = app(RecordingPlatform::default());

    let (status, body) = send(&app, post_deployment("", deployment_body("dep-1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["deployment_id"], "dep-1");
    assert_eq!(body["status"], "in_progress");
}

#[tokio::test]
async fn test_invalid_request_answers_400() {
    let app = app(RecordingPlatform::default());
    let mut body = deployment_body("dep-1");
    body["name"] = json!("");

    let (status, body) = send(&app, post_deployment("?wait=true", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_failure");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_unknown_deployment_answers_404() {
    let app = app(RecordingPlatform::default());
    let (status, body) = send(
        &app,
        Request::get("/deployments/missing").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_metrics_count_runs() {
    let app = app(RecordingPlatform::default());
    send(&app, post_deployment("?wait=true", deployment_body("dep-1"))).await;

    let (status, body) = send(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["targets"]["production/primary"]["succeeded"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_client_disconnect_does_not_stop_the_run() {
    let app = app(RecordingPlatform::slow(Duration::from_secs(5)));

    // the client gives up while the workload is still rolling out
    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        send(&app, post_deployment("?wait=true", deployment_body("dep-1"))),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(60)).await;
    let (status, body) = send(
        &app,
        Request::get("/deployments/dep-1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["phase"], "completed");
    assert!(!body["end_time"].is_null());
}

#[tokio::test]
async fn test_cross_origin_callers_get_no_cors_grant() {
    let app = app(RecordingPlatform::default());
    let request = Request::post("/deployments?wait=true")
        .header("content-type", "application/json")
        .header("origin", "https://intranet.example")
        .body(Body::from(deployment_body("dep-1").to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}
