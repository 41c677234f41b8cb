//! Cache Module
//!
//! TTL result caches for searches and feasibility checks, the order entity
//! cache, access accounting and statistics. All caches share one storage
//! backend handed in at construction.

pub mod accounting;
pub mod clock;
mod entity;
mod entry;
mod kinds;
mod stats;
mod ttl;


use std::sync::Arc;

use tokio::task::JoinHandle;

// Re-export public types
pub use accounting::AccessRecorder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::OrderCache;
pub use entry::{
    EntryMeta, FilterProjection, OrderFields, OrderFilter, OrderRow, OrderUpdate, ResultRow,
    ResultTable, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use kinds::{ArchiveSearch, Feasibility, QueryKind};
pub use stats::{
    EntityStats, OrderAggregate, ResultAggregate, SessionCounters, SessionStats, TtlStats,
};
pub use ttl::{FeasibilityCache, SearchCache, TtlCache};

use crate::storage::CacheBackend;

// == Cache Context ==
/// The process's cache handles, built once and passed to whoever needs them.
#[derive(Clone)]
pub struct CacheContext {
    pub searches: SearchCache,
    pub feasibility: FeasibilityCache,
    pub orders: OrderCache,
    recorder: AccessRecorder,
    backend: Arc<dyn CacheBackend>,
}

impl CacheContext {
    /// Builds the caches around an existing accounting handle.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        recorder: AccessRecorder,
        clock: Arc<dyn Clock>,
        default_ttl: u64,
    ) -> Self {
        Self {
            searches: SearchCache::new(
                Arc::clone(&backend),
                recorder.clone(),
                Arc::clone(&clock),
                default_ttl,
            ),
            feasibility: FeasibilityCache::new(
                Arc::clone(&backend),
                recorder.clone(),
                Arc::clone(&clock),
                default_ttl,
            ),
            orders: OrderCache::new(Arc::clone(&backend), clock),
            recorder,
            backend,
        }
    }

    /// Spawns the accounting worker and builds the caches.
    ///
    /// # Arguments
    /// * `backend` - Shared storage
    /// * `clock` - Time source for every cache
    /// * `default_ttl` - Default result lifetime in seconds
    /// * `queue_capacity` - Bound of the accounting channel
    ///
    /// # Returns
    /// The context and the worker's JoinHandle. The worker stops once every
    /// clone of the context has been dropped.
    pub fn start(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        default_ttl: u64,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (recorder, worker) = AccessRecorder::spawn(Arc::clone(&backend), queue_capacity);
        (Self::new(backend, recorder, clock, default_ttl), worker)
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn recorder(&self) -> &AccessRecorder {
        &self.recorder
    }

    /// Waits for pending access records to reach storage.
    pub async fn flush(&self) {
        self.recorder.flush().await;
    }
}
