//! Pool handle bookkeeping
//!
//! A [`PooledConnection`] remembers the family record it was lent from. Handing
//! it to [`ConnectionPool::release`](crate::pool::ConnectionPool::release) or
//! simply dropping it both check the handle back in, so a borrower cancelled
//! mid-call never strands its slot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::pool::ApiFamily;

/// Pool-side record of one client
pub(crate) struct ConnectionHandle<C> {
    pub id: u64,
    pub client: C,
    pub last_used_at: Instant,
    pub error_count: u32,
    pub in_use: bool,
}

impl<C> ConnectionHandle<C> {
    /// A freshly created handle, owned by its creator until checked in
    pub fn borrowed(id: u64, client: C) -> Self {
        Self {
            id,
            client,
            last_used_at: Instant::now(),
            error_count: 0,
            in_use: true,
        }
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_used_at.elapsed()
    }
}

/// What a parked borrower receives
pub(crate) enum Handoff<C: Clone> {
    Handle(PooledConnection<C>),
    /// Capacity freed up; try again
    Retry,
}

pub(crate) struct FamilyState<C: Clone> {
    pub handles: Vec<ConnectionHandle<C>>,
    pub waiters: VecDeque<oneshot::Sender<Handoff<C>>>,
    /// Creations in progress, counted against the cap
    pub creating: usize,
}

pub(crate) type Shared<C> = Arc<Mutex<FamilyState<C>>>;

pub(crate) fn lock<C: Clone>(state: &Mutex<FamilyState<C>>) -> MutexGuard<'_, FamilyState<C>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Where a borrowed client goes back to
pub(crate) struct Home<C: Clone> {
    state: Weak<Mutex<FamilyState<C>>>,
    closed: Arc<AtomicBool>,
    max_errors: u32,
}

impl<C: Clone> Clone for Home<C> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            closed: self.closed.clone(),
            max_errors: self.max_errors,
        }
    }
}

impl<C: Clone> Home<C> {
    pub fn new(state: &Shared<C>, closed: &Arc<AtomicBool>, max_errors: u32) -> Self {
        Self {
            state: Arc::downgrade(state),
            closed: closed.clone(),
            max_errors,
        }
    }
}

impl<C: Clone> FamilyState<C> {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            waiters: VecDeque::new(),
            creating: 0,
        }
    }

    /// Wake the oldest live waiter so it can re-check capacity
    pub fn wake_one(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            if tx.send(Handoff::Retry).is_ok() {
                return;
            }
        }
    }

    /// Mark the first idle handle borrowed
    pub fn lend_idle(&mut self, family: ApiFamily, home: &Home<C>) -> Option<PooledConnection<C>> {
        let handle = self.handles.iter_mut().find(|h| !h.in_use)?;
        handle.in_use = true;
        handle.last_used_at = Instant::now();
        Some(PooledConnection::new(
            handle.id,
            family,
            handle.client.clone(),
            home.clone(),
        ))
    }

    /// Take back a borrowed handle: discard it, pass it to the oldest live
    /// waiter, or mark it idle
    pub fn check_in(&mut self, home: &Home<C>, family: ApiFamily, id: u64, errored: bool, healthy: bool) {
        let Some(pos) = self.handles.iter().position(|h| h.id == id) else {
            debug!(family = %family, handle = id, "checked in unknown handle");
            return;
        };

        let handle = &mut self.handles[pos];
        handle.last_used_at = Instant::now();
        if errored {
            handle.error_count += 1;
        }

        if !healthy || handle.error_count >= home.max_errors || home.closed.load(Ordering::SeqCst) {
            debug!(
                family = %family,
                handle = id,
                errors = handle.error_count,
                "discarding returned handle"
            );
            self.handles.remove(pos);
            self.wake_one();
            return;
        }

        let mut ticket = PooledConnection::new(id, family, handle.client.clone(), home.clone());
        while let Some(tx) = self.waiters.pop_front() {
            match tx.send(Handoff::Handle(ticket)) {
                Ok(()) => return,
                Err(Handoff::Handle(back)) => ticket = back,
                Err(Handoff::Retry) => return,
            }
        }
        // must not re-enter this record from Drop while it is locked
        ticket.disarm();
        handle.in_use = false;
    }
}

/// A borrowed client. Give it back with `ConnectionPool::release`; dropping
/// it instead checks it in as errored without validation.
pub struct PooledConnection<C: Clone> {
    id: u64,
    family: ApiFamily,
    client: C,
    errored: bool,
    home: Option<Home<C>>,
}

impl<C: Clone> PooledConnection<C> {
    pub(crate) fn new(id: u64, family: ApiFamily, client: C, home: Home<C>) -> Self {
        Self {
            id,
            family,
            client,
            errored: false,
            home: Some(home),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn family(&self) -> ApiFamily {
        self.family
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Count a failed call against this handle on release
    pub fn mark_error(&mut self) {
        self.errored = true;
    }

    pub(crate) fn errored(&self) -> bool {
        self.errored
    }

    /// Detach from the pool; dropping the connection afterwards is inert
    pub(crate) fn disarm(&mut self) -> Option<Home<C>> {
        self.home.take()
    }
}

impl<C: Clone> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(home) = self.home.take() else {
            return;
        };
        let Some(state) = home.state.upgrade() else {
            return;
        };
        debug!(family = %self.family, handle = self.id, "borrowed handle dropped without release");
        lock(&state).check_in(&home, self.family, self.id, true, true);
    }
}

impl<C: Clone> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("errored", &self.errored)
            .finish_non_exhaustive()
    }
}
