//! Expiry Sweep Task
//!
//! Background task that periodically deletes expired rows from the TTL caches.
//! Reads already treat expired rows as absent; the sweep only reclaims space.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheContext;

/// Spawns a background task that sweeps both TTL caches.
///
/// The task sleeps for the interval between runs. A failed sweep is logged and
/// retried on the next tick.
///
/// # Arguments
/// * `caches` - Cache handles shared with the rest of the process
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_cleanup_task(caches: CacheContext, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;
            sweep_once(&caches).await;
        }
    })
}

/// Runs one sweep over both TTL caches. Returns the number of rows removed.
pub async fn sweep_once(caches: &CacheContext) -> u64 {
    let mut removed = 0;

    match caches.searches.clear_expired().await {
        Ok(n) => removed += n,
        Err(e) => warn!(cache = "search", error = %e, "Expiry sweep failed"),
    }
    match caches.feasibility.clear_expired().await {
        Ok(n) => removed += n,
        Err(e) => warn!(cache = "feasibility", error = %e, "Expiry sweep failed"),
    }

    if removed > 0 {
        info!("Expiry sweep: removed {} expired entries", removed);
    } else {
        debug!("Expiry sweep: no expired entries found");
    }
    removed
}
