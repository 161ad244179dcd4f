//! Lock and result store tests

use std::sync::Arc;
use std::time::Duration;

use fabrollout::collaborators::Capabilities;
use fabrollout::deploy::{Orchestrator, OrchestratorConfig};
use fabrollout::models::DeploymentStatus;
use fabrollout::state::{FileStateStore, LockStatus, LockType, MemoryStateStore, StateStore};
use fabrollout::storage::layout::StorageLayout;

use crate::common::{fast_resilience, rolling_request, RecordingPlatform};

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_file_stores_sharing_a_directory_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let first = FileStateStore::new(&layout);
    let second = FileStateStore::new(&layout);

    assert_eq!(
        first.acquire_lock("dep-1", LockType::Deployment, TTL).await,
        LockStatus::Acquired
    );
    assert_eq!(
        second.acquire_lock("dep-1", LockType::Deployment, TTL).await,
        LockStatus::AlreadyLocked
    );

    first.release_lock("dep-1", LockType::Deployment).await.unwrap();
    assert_eq!(
        second.acquire_lock("dep-1", LockType::Deployment, TTL).await,
        LockStatus::Acquired
    );
}

#[tokio::test]
async fn test_lock_types_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let stores: Vec<Box<dyn StateStore>> = vec![
        Box::new(MemoryStateStore::new()),
        Box::new(FileStateStore::new(&StorageLayout::new(dir.path()))),
    ];

    for store in stores {
        assert_eq!(
            store.acquire_lock("dep-1", LockType::Deployment, TTL).await,
            LockStatus::Acquired
        );
        assert_eq!(
            store.acquire_lock("dep-1", LockType::Rollback, TTL).await,
            LockStatus::Acquired
        );
        assert_eq!(
            store.acquire_lock("dep-1", LockType::Rollback, TTL).await,
            LockStatus::AlreadyLocked
        );
    }
}

#[tokio::test]
async fn test_exactly_one_concurrent_acquirer_wins() {
    let store = Arc::new(MemoryStateStore::new());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.acquire_lock("dep-1", LockType::Deployment, TTL).await
        }));
    }

    let mut acquired = 0;
    for task in tasks {
        if task.await.unwrap() == LockStatus::Acquired {
            acquired += 1;
        }
    }
    assert_eq!(acquired, 1);
    assert!(store.holder("dep-1", LockType::Deployment).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_file_store_acquirer_wins() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());

    for round in 0..20 {
        let key = format!("dep-{round}");
        let mut tasks = Vec::new();
        for _ in 0..16 {
            // separate stores over one directory, as separate processes would be
            let store = FileStateStore::new(&layout);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                store.acquire_lock(&key, LockType::Deployment, TTL).await
            }));
        }

        let mut acquired = 0;
        for task in tasks {
            match task.await.unwrap() {
                LockStatus::Acquired => acquired += 1,
                LockStatus::AlreadyLocked => {}
                LockStatus::Error(e) => panic!("lock attempt failed: {e}"),
            }
        }
        assert_eq!(acquired, 1, "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_file_store_acquirer_takes_over_an_expired_lock() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());

    for round in 0..10 {
        let key = format!("dep-{round}");
        let expired = FileStateStore::new(&layout)
            .acquire_lock(&key, LockType::Deployment, Duration::ZERO)
            .await;
        assert_eq!(expired, LockStatus::Acquired);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = FileStateStore::new(&layout);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                store.acquire_lock(&key, LockType::Deployment, TTL).await
            }));
        }

        let mut acquired = 0;
        for task in tasks {
            if task.await.unwrap() == LockStatus::Acquired {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1, "round {round}");
    }
}

#[tokio::test]
async fn test_results_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());

    let orchestrator = |layout: &StorageLayout| {
        Orchestrator::new(
            Capabilities::new(Arc::new(RecordingPlatform::default())),
            Arc::new(FileStateStore::new(layout)),
            fast_resilience(),
            OrchestratorConfig::default(),
        )
    };

    let before = orchestrator(&layout);
    before.deploy(rolling_request("dep-1")).await.unwrap();
    drop(before);

    let after = orchestrator(&layout);
    assert!(after.list_active().is_empty());
    let result = after.get_status("dep-1").await.unwrap().unwrap();
    assert_eq!(result.status, DeploymentStatus::Success);
    assert_eq!(after.list_all().await.unwrap().len(), 1);

    // the lock file was removed at the end of the run
    let store = FileStateStore::new(&layout);
    assert_eq!(
        store.acquire_lock("dep-1", LockType::Deployment, TTL).await,
        LockStatus::Acquired
    );
}
