//! Per-family pool of reusable clients
//!
//! Every family has its own record behind a short-lived lock that is never
//! held across an await. Borrowers that find the family saturated park a
//! oneshot sender in a FIFO queue. A release hands its handle straight to the
//! oldest live waiter; a discard wakes that waiter so it can create a
//! replacement itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::pool::handle::{
    lock, ConnectionHandle, FamilyState, Handoff, Home, PooledConnection, Shared,
};
use crate::pool::{ApiFamily, ClientFactory, PoolConfig};

enum Step<C: Clone> {
    Borrowed(PooledConnection<C>),
    Create(CreateSlot<C>),
    Wait(oneshot::Receiver<Handoff<C>>),
}

/// A reserved creation slot. Unless filled, dropping it gives the slot back
/// and wakes a waiter.
struct CreateSlot<C: Clone> {
    state: Shared<C>,
    filled: bool,
}

impl<C: Clone> CreateSlot<C> {
    fn reserve(state: &Shared<C>, guard: &mut FamilyState<C>) -> Self {
        guard.creating += 1;
        Self {
            state: state.clone(),
            filled: false,
        }
    }

    fn fill(mut self, guard: &mut FamilyState<C>) {
        self.filled = true;
        guard.creating -= 1;
    }
}

impl<C: Clone> Drop for CreateSlot<C> {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        let mut guard = lock(&self.state);
        guard.creating -= 1;
        guard.wake_one();
    }
}

/// Per-family counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub family: ApiFamily,
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
}

/// Connection pool over a [`ClientFactory`]
pub struct ConnectionPool<F: ClientFactory> {
    factory: F,
    config: PoolConfig,
    families: Mutex<HashMap<ApiFamily, Shared<F::Client>>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl<F: ClientFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            families: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn family_state(&self, family: ApiFamily) -> Shared<F::Client> {
        let mut families = self.families.lock().unwrap_or_else(|e| e.into_inner());
        families
            .entry(family)
            .or_insert_with(|| Arc::new(Mutex::new(FamilyState::new())))
            .clone()
    }

    fn home(&self, state: &Shared<F::Client>) -> Home<F::Client> {
        Home::new(state, &self.closed, self.config.max_errors)
    }

    fn ensure_open(&self) -> Result<(), OrchestratorError> {
        if self.is_closed() {
            return Err(OrchestratorError::Shutdown(
                "connection pool is closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn probe(&self, family: ApiFamily, client: &F::Client) -> bool {
        tokio::time::timeout(
            self.config.validation_timeout(),
            self.factory.validate(family, client),
        )
        .await
        .unwrap_or(false)
    }

    /// Borrow a client for `family`, waiting up to the acquire timeout
    pub async fn acquire(
        &self,
        family: ApiFamily,
    ) -> Result<PooledConnection<F::Client>, OrchestratorError> {
        let deadline = Instant::now() + self.config.acquire_timeout();
        let state = self.family_state(family);
        let home = self.home(&state);

        loop {
            self.ensure_open()?;

            let step = {
                let mut guard = lock(&state);
                if let Some(conn) = guard.lend_idle(family, &home) {
                    Step::Borrowed(conn)
                } else if guard.handles.len() + guard.creating < self.config.max_connections {
                    Step::Create(CreateSlot::reserve(&state, &mut guard))
                } else {
                    let (tx, rx) = oneshot::channel();
                    guard.waiters.push_back(tx);
                    Step::Wait(rx)
                }
            };

            match step {
                Step::Borrowed(mut conn) => {
                    if self.config.validate_on_borrow && !self.probe(family, conn.client()).await {
                        warn!(family = %family, handle = conn.id(), "discarding handle that failed validation");
                        conn.disarm();
                        self.discard(&state, conn.id());
                        continue;
                    }
                    return Ok(conn);
                }
                Step::Create(slot) => return self.create_lent(family, slot, &home).await,
                Step::Wait(mut rx) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::select! {
                        handoff = &mut rx => match handoff {
                            Ok(Handoff::Handle(conn)) => return Ok(conn),
                            Ok(Handoff::Retry) => continue,
                            Err(_) => {
                                return Err(OrchestratorError::Shutdown(
                                    "connection pool is closed".to_string(),
                                ))
                            }
                        },
                        _ = tokio::time::sleep(remaining) => {
                            // a handoff may have raced the deadline
                            rx.close();
                            if let Ok(Handoff::Handle(conn)) = rx.try_recv() {
                                return Ok(conn);
                            }
                            debug!(family = %family, "acquire timed out");
                            return Err(OrchestratorError::AcquireTimeout {
                                family: family.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Create a handle in a reserved slot and lend it to the caller
    async fn create_lent(
        &self,
        family: ApiFamily,
        slot: CreateSlot<F::Client>,
        home: &Home<F::Client>,
    ) -> Result<PooledConnection<F::Client>, OrchestratorError> {
        let client = self.create_with_retries(family).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = slot.state.clone();
        let mut guard = lock(&state);
        slot.fill(&mut guard);
        guard.handles.push(ConnectionHandle::borrowed(id, client.clone()));
        debug!(family = %family, handle = id, "created pooled handle");
        Ok(PooledConnection::new(id, family, client, home.clone()))
    }

    async fn create_with_retries(&self, family: ApiFamily) -> Result<F::Client, OrchestratorError> {
        let mut attempt = 0;
        loop {
            match self.factory.create(family).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt < self.config.create_retries => {
                    attempt += 1;
                    warn!(family = %family, attempt, error = %e, "client creation failed, retrying");
                    tokio::time::sleep(self.config.create_backoff() * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Return a borrowed client
    pub async fn release(&self, mut conn: PooledConnection<F::Client>) {
        let family = conn.family();
        let healthy = if self.config.validate_on_return && !self.is_closed() {
            self.probe(family, conn.client()).await
        } else {
            true
        };

        let Some(home) = conn.disarm() else {
            return;
        };
        let state = self.family_state(family);
        lock(&state).check_in(&home, family, conn.id(), conn.errored(), healthy);
    }

    fn discard(&self, state: &Shared<F::Client>, id: u64) {
        let mut guard = lock(state);
        guard.handles.retain(|h| h.id != id);
        guard.wake_one();
    }

    /// Drop idle handles past the idle timeout, keeping `min_connections`
    pub fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let min = self.config.min_connections;
        let states: Vec<_> = {
            let families = self.families.lock().unwrap_or_else(|e| e.into_inner());
            families.iter().map(|(f, s)| (*f, s.clone())).collect()
        };

        let mut reaped = 0;
        for (family, state) in states {
            let mut guard = lock(&state);
            let mut total = guard.handles.len();
            let before = total;
            guard.handles.retain(|h| {
                if total > min && !h.in_use && h.idle_for() >= idle_timeout {
                    total -= 1;
                    false
                } else {
                    true
                }
            });
            let removed = before - guard.handles.len();
            if removed > 0 {
                debug!(family = %family, removed, "reaped idle handles");
            }
            reaped += removed;
        }
        reaped
    }

    /// Pre-create idle handles up to `min_connections`
    pub async fn warm_up(&self, family: ApiFamily) -> Result<usize, OrchestratorError> {
        let state = self.family_state(family);
        let home = self.home(&state);
        let mut created = 0;
        loop {
            self.ensure_open()?;
            let slot = {
                let mut guard = lock(&state);
                let total = guard.handles.len() + guard.creating;
                if total >= self.config.min_connections || total >= self.config.max_connections {
                    return Ok(created);
                }
                CreateSlot::reserve(&state, &mut guard)
            };

            let client = self.create_with_retries(family).await?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut guard = lock(&state);
            slot.fill(&mut guard);
            guard.handles.push(ConnectionHandle::borrowed(id, client));
            // hands it to a parked borrower if there is one
            guard.check_in(&home, family, id, false, true);
            created += 1;
        }
    }

    /// Refuse new borrows, drop idle handles and fail parked waiters
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let families = self.families.lock().unwrap_or_else(|e| e.into_inner());
        for (family, state) in families.iter() {
            let mut guard = lock(state);
            guard.handles.retain(|h| h.in_use);
            let waiters = guard.waiters.len();
            guard.waiters.clear();
            info!(family = %family, waiters, borrowed = guard.handles.len(), "closed pool family");
        }
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        let families = self.families.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats: Vec<PoolStats> = families
            .iter()
            .map(|(family, state)| {
                let guard = lock(state);
                let in_use = guard.handles.iter().filter(|h| h.in_use).count();
                PoolStats {
                    family: *family,
                    total: guard.handles.len(),
                    idle: guard.handles.len() - in_use,
                    in_use,
                    waiting: guard.waiters.iter().filter(|tx| !tx.is_closed()).count(),
                }
            })
            .collect();
        stats.sort_by_key(|s| s.family);
        stats
    }

    pub fn family_stats(&self, family: ApiFamily) -> PoolStats {
        self.stats()
            .into_iter()
            .find(|s| s.family == family)
            .unwrap_or(PoolStats {
                family,
                total: 0,
                idle: 0,
                in_use: 0,
                waiting: 0,
            })
    }
}
