//! Connection pool tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fabrollout::errors::OrchestratorError;
use fabrollout::pool::{ApiFamily, ClientFactory, ConnectionPool, PoolConfig};

/// Hands out sequential client ids; ids listed in `broken` fail validation
#[derive(Default)]
struct SequenceFactory {
    created: AtomicUsize,
    broken: Mutex<HashSet<usize>>,
}

#[async_trait]
impl ClientFactory for SequenceFactory {
    type Client = usize;

    async fn create(&self, _family: ApiFamily) -> Result<usize, OrchestratorError> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn validate(&self, _family: ApiFamily, client: &usize) -> bool {
        !self.broken.lock().unwrap().contains(client)
    }
}

fn config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min_connections: min,
        max_connections: max,
        acquire_timeout_ms: 500,
        idle_timeout_secs: 10,
        ..PoolConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_borrowers_never_share_a_handle() {
    let pool = Arc::new(ConnectionPool::new(SequenceFactory::default(), PoolConfig {
        acquire_timeout_ms: 60_000,
        ..config(0, 3)
    }));
    let lent = Arc::new(Mutex::new(HashSet::new()));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let pool = pool.clone();
        let lent = lent.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let conn = pool.acquire(ApiFamily::Apps).await.unwrap();
            {
                let mut lent = lent.lock().unwrap();
                assert!(lent.insert(conn.id()), "handle {} lent twice", conn.id());
                peak.fetch_max(lent.len(), Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            lent.lock().unwrap().remove(&conn.id());
            pool.release(conn).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.factory().created.load(Ordering::SeqCst) <= 3);
    let stats = pool.family_stats(ApiFamily::Apps);
    assert!(stats.total <= 3);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_family_times_out() {
    let pool = ConnectionPool::new(SequenceFactory::default(), config(0, 1));
    let held = pool.acquire(ApiFamily::Core).await.unwrap();

    let err = pool.acquire(ApiFamily::Core).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AcquireTimeout { ref family } if family == "core"));

    // families are capped separately
    let other = pool.acquire(ApiFamily::Rbac).await.unwrap();
    pool.release(other).await;
    pool.release(held).await;
}

#[tokio::test(start_paused = true)]
async fn test_release_hands_off_to_waiter() {
    let pool = Arc::new(ConnectionPool::new(SequenceFactory::default(), PoolConfig {
        acquire_timeout_ms: 60_000,
        ..config(0, 1)
    }));
    let held = pool.acquire(ApiFamily::Core).await.unwrap();
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(ApiFamily::Core).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.family_stats(ApiFamily::Core).waiting, 1);

    pool.release(held).await;
    let handed = waiter.await.unwrap().unwrap();
    assert_eq!(handed.id(), held_id);
    assert_eq!(pool.factory().created.load(Ordering::SeqCst), 1);
    pool.release(handed).await;
}

#[tokio::test(start_paused = true)]
async fn test_reap_never_drops_below_minimum() {
    let pool = ConnectionPool::new(SequenceFactory::default(), config(2, 5));
    assert_eq!(pool.warm_up(ApiFamily::Networking).await.unwrap(), 2);

    let mut conns = Vec::new();
    for _ in 0..4 {
        conns.push(pool.acquire(ApiFamily::Networking).await.unwrap());
    }
    for conn in conns {
        pool.release(conn).await;
    }
    assert_eq!(pool.family_stats(ApiFamily::Networking).total, 4);

    // nothing is idle long enough yet
    assert_eq!(pool.reap_idle(), 0);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(pool.reap_idle(), 2);
    assert_eq!(pool.reap_idle(), 0);
    assert_eq!(pool.family_stats(ApiFamily::Networking).total, 2);
}

#[tokio::test]
async fn test_invalid_idle_handle_is_replaced() {
    let pool = ConnectionPool::new(SequenceFactory::default(), config(1, 2));
    pool.warm_up(ApiFamily::Custom).await.unwrap();
    pool.factory().broken.lock().unwrap().insert(0);

    let conn = pool.acquire(ApiFamily::Custom).await.unwrap();
    assert_eq!(*conn.client(), 1);
    assert_eq!(pool.family_stats(ApiFamily::Custom).total, 1);
    pool.release(conn).await;
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_waiters_and_new_borrows() {
    let pool = Arc::new(ConnectionPool::new(SequenceFactory::default(), PoolConfig {
        acquire_timeout_ms: 60_000,
        ..config(0, 1)
    }));
    let held = pool.acquire(ApiFamily::Core).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(ApiFamily::Core).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.close();
    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "shutdown");
    assert!(pool.acquire(ApiFamily::Apps).await.is_err());

    // a handle returned after close is dropped
    pool.release(held).await;
    assert_eq!(pool.family_stats(ApiFamily::Core).total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_borrower_cancelled_mid_call_returns_its_handle() {
    let pool = ConnectionPool::new(SequenceFactory::default(), config(0, 1));

    let call = tokio::time::timeout(Duration::from_millis(200), async {
        let conn = pool.acquire(ApiFamily::Core).await?;
        // the remote side never answers
        tokio::time::sleep(Duration::from_secs(3600)).await;
        pool.release(conn).await;
        Ok::<_, OrchestratorError>(())
    })
    .await;
    assert!(call.is_err());

    let stats = pool.family_stats(ApiFamily::Core);
    assert_eq!((stats.total, stats.in_use, stats.idle), (1, 0, 1));
    let conn = pool.acquire(ApiFamily::Core).await.unwrap();
    assert_eq!(*conn.client(), 0);
    pool.release(conn).await;
}

#[tokio::test(start_paused = true)]
async fn test_waiter_cancelled_after_handoff_returns_the_handle() {
    let pool = Arc::new(ConnectionPool::new(SequenceFactory::default(), PoolConfig {
        acquire_timeout_ms: 60_000,
        ..config(0, 1)
    }));
    let held = pool.acquire(ApiFamily::Core).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(ApiFamily::Core).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.family_stats(ApiFamily::Core).waiting, 1);

    // the handle is parked in the waiter's channel when the waiter goes away
    pool.release(held).await;
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    let stats = pool.family_stats(ApiFamily::Core);
    assert_eq!((stats.total, stats.in_use), (1, 0));
    let conn = pool.acquire(ApiFamily::Core).await.unwrap();
    pool.release(conn).await;
}
