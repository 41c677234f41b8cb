//! Storage Module
//!
//! Persistence seam for the caches. A backend must offer an atomic
//! insert-or-update by unique key, point lookups, conditional deletes and
//! aggregate queries; everything above it is backend-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cache::{
    OrderAggregate, OrderFilter, OrderRow, OrderUpdate, ResultAggregate, ResultRow, ResultTable,
};
use crate::config::{BackendKind, Config};
use crate::error::Result;

#[cfg(test)]
pub(crate) mod failing;
mod lock;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Point lookup by key, expired rows included; expiry is decided by the caller.
    async fn get_result(&self, table: ResultTable, key: &str) -> Result<Option<ResultRow>>;
    /// Atomic upsert. On conflict every column is replaced except `created_at`,
    /// `hit_count` goes back to 0 and `last_accessed_at` is cleared. The stored
    /// `updated_at` always moves strictly forward, so it identifies the write.
    async fn upsert_result(&self, table: ResultTable, row: ResultRow) -> Result<()>;
    /// Adds `hits` to the row's counter and sets `last_accessed_at`, provided the
    /// row still carries the `written_at` version that was read. Returns false
    /// when the row is gone or has been overwritten since.
    async fn record_access(
        &self,
        table: ResultTable,
        key: &str,
        written_at: DateTime<Utc>,
        hits: u64,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn delete_result(&self, table: ResultTable, key: &str) -> Result<bool>;
    async fn delete_all_results(&self, table: ResultTable) -> Result<u64>;
    /// Deletes rows with `expires_at <= now`.
    async fn delete_expired_results(&self, table: ResultTable, now: DateTime<Utc>) -> Result<u64>;
    async fn result_aggregate(&self, table: ResultTable, now: DateTime<Utc>) -> Result<ResultAggregate>;

    async fn get_order(&self, entity_id: &str) -> Result<Option<OrderRow>>;
    /// Atomic upsert with full replacement; the first `created_at` is kept.
    async fn upsert_order(&self, row: OrderRow) -> Result<()>;
    /// Applies `update` atomically. Returns the patched row, or `None` for an unknown id.
    async fn patch_order(
        &self,
        entity_id: &str,
        update: &OrderUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderRow>>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>>;
    async fn delete_order(&self, entity_id: &str) -> Result<bool>;
    async fn delete_all_orders(&self) -> Result<u64>;
    async fn order_aggregate(&self) -> Result<OrderAggregate>;

    async fn health_check(&self) -> Result<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Opens the backend selected by the configuration.
pub fn open_backend(config: &Config) -> Result<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.database_path)?),
        BackendKind::Memory => {
            warn!("Using in-memory storage; cached data will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };
    info!(backend = backend.backend_name(), durable = backend.is_durable(), "Storage backend ready");
    Ok(backend)
}
