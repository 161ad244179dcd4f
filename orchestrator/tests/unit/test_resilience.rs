//! Circuit breaker and retry tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use fabrollout::errors::OrchestratorError;
use fabrollout::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Resilience, RetryConfig,
};

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 2,
        success_threshold: 2,
        reset_timeout_ms: 1_000,
        call_timeout_ms: 5_000,
    }
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), OrchestratorError> {
    breaker
        .execute(|| async { Err(OrchestratorError::collaborator("platform", "502 bad gateway")) })
        .await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), OrchestratorError> {
    breaker.execute(|| async { Ok(()) }).await
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_half_opens_and_closes() {
    let breaker = CircuitBreaker::new("production:platform.deploy", breaker_config());

    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    // rejected without running the call
    let calls = AtomicU32::new(0);
    let err = breaker
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = CircuitBreaker::new("op", breaker_config());
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;

    tokio::time::advance(Duration::from_millis(1_500)).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // the reset timeout restarts from the latest failure
    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(breaker.allow_request().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let resilience = Resilience::new(breaker_config(), RetryConfig::default());
    let calls = AtomicU32::new(0);

    let value = resilience
        .call("production", "mesh.get_service_mesh_status", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OrchestratorError::collaborator("mesh", "connection reset"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let breaker = resilience
        .breakers()
        .get_or_create("production", "mesh.get_service_mesh_status");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_ends_retries_early() {
    let resilience = Resilience::new(
        breaker_config(),
        RetryConfig {
            max_attempts: 5,
            ..RetryConfig::default()
        },
    );
    let calls = AtomicU32::new(0);

    let err = resilience
        .call("production", "platform.deploy", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(OrchestratorError::collaborator("platform", "503"))
        })
        .await
        .unwrap_err();

    // two failures open the breaker, the third attempt is refused
    assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_validation_errors_are_not_retried() {
    let resilience = Resilience::default();
    let calls = AtomicU32::new(0);

    let err = resilience
        .call("production", "security.create_secret", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(OrchestratorError::Validation("bad secret".to_string()))
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "validation_failure");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_isolated_per_environment() {
    let resilience = Resilience::new(
        breaker_config(),
        RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
    )
    .with_environment(
        "staging",
        Some(CircuitBreakerConfig {
            failure_threshold: 1,
            ..breaker_config()
        }),
        None,
    );

    let _ = resilience
        .call("staging", "platform.deploy", || async {
            Err::<(), _>(OrchestratorError::collaborator("platform", "503"))
        })
        .await;
    let _ = resilience
        .call("production", "platform.deploy", || async {
            Err::<(), _>(OrchestratorError::collaborator("platform", "503"))
        })
        .await;

    let states = resilience.breakers().states();
    assert_eq!(
        states,
        vec![
            ("production:platform.deploy".to_string(), CircuitState::Closed),
            ("staging:platform.deploy".to_string(), CircuitState::Open),
        ]
    );
}
