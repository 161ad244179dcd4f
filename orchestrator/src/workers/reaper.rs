//! Idle connection reaper

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::pool::{ClientFactory, ConnectionPool};

/// Reaper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Sweep idle connections until shutdown or until the pool closes
pub async fn run<F, S, Fut>(
    options: &Options,
    pool: &ConnectionPool<F>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    F: ClientFactory,
    S: Fn(Duration) -> Fut,
    Fut: Future<Output = ()>,
{
    info!(interval = ?options.interval, "reaper worker starting");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("reaper worker shutting down");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        if pool.is_closed() {
            info!("pool closed, reaper worker exiting");
            return;
        }

        let reaped = pool.reap_idle();
        if reaped > 0 {
            debug!(reaped, "reaped idle connections");
        }
    }
}
