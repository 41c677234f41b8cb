//! Backend that fails on demand, for exercising the error policy of the caches.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CacheBackend, MemoryBackend};
use crate::cache::{
    OrderAggregate, OrderFilter, OrderRow, OrderUpdate, ResultAggregate, ResultRow, ResultTable,
};
use crate::error::{CacheError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureMode {
    /// Every call returns `StorageUnavailable`.
    Everything,
    /// Only `record_access` fails; the rest is served from memory.
    Accounting,
}

#[derive(Debug)]
pub(crate) struct FailingBackend {
    inner: MemoryBackend,
    mode: FailureMode,
    access_attempts: AtomicU64,
}

impl FailingBackend {
    pub(crate) fn new(mode: FailureMode) -> Self {
        Self {
            inner: MemoryBackend::new(),
            mode,
            access_attempts: AtomicU64::new(0),
        }
    }

    /// Number of `record_access` calls received.
    pub(crate) fn access_attempts(&self) -> u64 {
        self.access_attempts.load(Ordering::Relaxed)
    }

    fn check(&self, op: &str) -> Result<()> {
        match self.mode {
            FailureMode::Everything => Err(unavailable(op)),
            FailureMode::Accounting => Ok(()),
        }
    }
}

fn unavailable(op: &str) -> CacheError {
    CacheError::StorageUnavailable(format!("{} failed: disk I/O error", op))
}

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get_result(&self, table: ResultTable, key: &str) -> Result<Option<ResultRow>> {
        self.check("get_result")?;
        self.inner.get_result(table, key).await
    }

    async fn upsert_result(&self, table: ResultTable, row: ResultRow) -> Result<()> {
        self.check("upsert_result")?;
        self.inner.upsert_result(table, row).await
    }

    async fn record_access(
        &self,
        _table: ResultTable,
        _key: &str,
        _written_at: DateTime<Utc>,
        _hits: u64,
        _at: DateTime<Utc>,
    ) -> Result<bool> {
        self.access_attempts.fetch_add(1, Ordering::Relaxed);
        Err(unavailable("record_access"))
    }

    async fn delete_result(&self, table: ResultTable, key: &str) -> Result<bool> {
        self.check("delete_result")?;
        self.inner.delete_result(table, key).await
    }

    async fn delete_all_results(&self, table: ResultTable) -> Result<u64> {
        self.check("delete_all_results")?;
        self.inner.delete_all_results(table).await
    }

    async fn delete_expired_results(&self, table: ResultTable, now: DateTime<Utc>) -> Result<u64> {
        self.check("delete_expired_results")?;
        self.inner.delete_expired_results(table, now).await
    }

    async fn result_aggregate(&self, table: ResultTable, now: DateTime<Utc>) -> Result<ResultAggregate> {
        self.check("result_aggregate")?;
        self.inner.result_aggregate(table, now).await
    }

    async fn get_order(&self, entity_id: &str) -> Result<Option<OrderRow>> {
        self.check("get_order")?;
        self.inner.get_order(entity_id).await
    }

    async fn upsert_order(&self, row: OrderRow) -> Result<()> {
        self.check("upsert_order")?;
        self.inner.upsert_order(row).await
    }

    async fn patch_order(
        &self,
        entity_id: &str,
        update: &OrderUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderRow>> {
        self.check("patch_order")?;
        self.inner.patch_order(entity_id, update, now).await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>> {
        self.check("list_orders")?;
        self.inner.list_orders(filter).await
    }

    async fn delete_order(&self, entity_id: &str) -> Result<bool> {
        self.check("delete_order")?;
        self.inner.delete_order(entity_id).await
    }

    async fn delete_all_orders(&self) -> Result<u64> {
        self.check("delete_all_orders")?;
        self.inner.delete_all_orders().await
    }

    async fn order_aggregate(&self) -> Result<OrderAggregate> {
        self.check("order_aggregate")?;
        self.inner.order_aggregate().await
    }

    async fn health_check(&self) -> Result<()> {
        self.check("health_check")
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
