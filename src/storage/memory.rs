//! In-memory storage backend.
//!
//! Keeps every table in a `HashMap` behind a `tokio::sync::RwLock`. Each
//! mutation runs under the table's write lock, which gives the same
//! single-statement atomicity the SQLite backend gets from `ON CONFLICT`.
//! Not durable: all state is lost on process restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::CacheBackend;
use crate::cache::{
    OrderAggregate, OrderFilter, OrderRow, OrderUpdate, ResultAggregate, ResultRow, ResultTable,
};
use crate::error::Result;

type ResultMap = RwLock<HashMap<String, ResultRow>>;

// == Memory Backend ==
/// Process-local backend for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    searches: ResultMap,
    feasibility: ResultMap,
    orders: RwLock<HashMap<String, OrderRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn results(&self, table: ResultTable) -> &ResultMap {
        match table {
            ResultTable::Search => &self.searches,
            ResultTable::Feasibility => &self.feasibility,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get_result(&self, table: ResultTable, key: &str) -> Result<Option<ResultRow>> {
        Ok(self.results(table).read().await.get(key).cloned())
    }

    async fn upsert_result(&self, table: ResultTable, row: ResultRow) -> Result<()> {
        let mut entries = self.results(table).write().await;
        match entries.get_mut(row.key.as_str()) {
            Some(existing) => existing.overwrite_with(row),
            None => {
                entries.insert(row.key.as_str().to_string(), row);
            }
        }
        Ok(())
    }

    async fn record_access(
        &self,
        table: ResultTable,
        key: &str,
        written_at: DateTime<Utc>,
        hits: u64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut entries = self.results(table).write().await;
        Ok(match entries.get_mut(key) {
            Some(row) if row.updated_at == written_at => {
                row.hit_count += hits;
                row.last_accessed_at = Some(at);
                true
            }
            _ => false,
        })
    }

    async fn delete_result(&self, table: ResultTable, key: &str) -> Result<bool> {
        Ok(self.results(table).write().await.remove(key).is_some())
    }

    async fn delete_all_results(&self, table: ResultTable) -> Result<u64> {
        let mut entries = self.results(table).write().await;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn delete_expired_results(&self, table: ResultTable, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.results(table).write().await;
        let before = entries.len();
        entries.retain(|_, row| !row.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    async fn result_aggregate(&self, table: ResultTable, now: DateTime<Utc>) -> Result<ResultAggregate> {
        let entries = self.results(table).read().await;
        Ok(entries.values().fold(ResultAggregate::default(), |mut agg, row| {
            agg.total_entries += 1;
            if row.is_expired(now) {
                agg.expired_entries += 1;
            }
            agg.total_hits += row.hit_count;
            agg.last_accessed = agg.last_accessed.max(row.last_accessed_at);
            agg
        }))
    }

    async fn get_order(&self, entity_id: &str) -> Result<Option<OrderRow>> {
        Ok(self.orders.read().await.get(entity_id).cloned())
    }

    async fn upsert_order(&self, row: OrderRow) -> Result<()> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&row.entity_id) {
            Some(existing) => existing.overwrite_with(row),
            None => {
                orders.insert(row.entity_id.clone(), row);
            }
        }
        Ok(())
    }

    async fn patch_order(
        &self,
        entity_id: &str,
        update: &OrderUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderRow>> {
        let mut orders = self.orders.write().await;
        let Some(row) = orders.get_mut(entity_id) else {
            return Ok(None);
        };

        // Patch a copy so a failed update leaves the stored row untouched.
        let mut patched = row.clone();
        patched.apply_update(update, now)?;
        *row = patched.clone();
        Ok(Some(patched))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>> {
        let orders = self.orders.read().await;
        let mut rows: Vec<OrderRow> = orders
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(OrderRow::listing_order);

        Ok(rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn delete_order(&self, entity_id: &str) -> Result<bool> {
        Ok(self.orders.write().await.remove(entity_id).is_some())
    }

    async fn delete_all_orders(&self) -> Result<u64> {
        let mut orders = self.orders.write().await;
        let count = orders.len() as u64;
        orders.clear();
        Ok(count)
    }

    async fn order_aggregate(&self) -> Result<OrderAggregate> {
        let orders = self.orders.read().await;
        let mut by_status = BTreeMap::new();
        let mut last_synced = None;
        for row in orders.values() {
            if let Some(ref status) = row.fields.status {
                *by_status.entry(status.clone()).or_insert(0) += 1;
            }
            last_synced = last_synced.max(Some(row.last_synced_at));
        }

        Ok(OrderAggregate {
            total_entries: orders.len() as u64,
            by_status,
            last_synced,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FilterProjection;
    use crate::keys::{normalize_value, KeyGenerator, ARCHIVE_SEARCH_RULES};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn row(aoi: &str, payload: &str, ttl_secs: i64) -> ResultRow {
        let params = normalize_value(&json!({ "aoi": aoi }), &ARCHIVE_SEARCH_RULES).unwrap();
        ResultRow::fresh(
            KeyGenerator::new().generate(&params),
            FilterProjection::default(),
            payload.as_bytes().to_vec(),
            None,
            t0(),
            t0() + Duration::seconds(ttl_secs),
        )
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let backend = MemoryBackend::new();
        let entry = row("POINT(0 0)", "v1", 60);
        let key = entry.key.clone();

        backend.upsert_result(ResultTable::Search, entry).await.unwrap();
        let stored = backend
            .get_result(ResultTable::Search, key.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, b"v1".to_vec());

        // Tables are independent
        assert!(backend
            .get_result(ResultTable::Feasibility, key.as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrite_resets_hits() {
        let backend = MemoryBackend::new();
        let first = row("POINT(0 0)", "v1", 60);
        let key = first.key.clone();
        backend.upsert_result(ResultTable::Search, first).await.unwrap();
        backend
            .record_access(ResultTable::Search, key.as_str(), t0(), 3, t0())
            .await
            .unwrap();

        backend
            .upsert_result(ResultTable::Search, row("POINT(0 0)", "v2", 60))
            .await
            .unwrap();

        let stored = backend
            .get_result(ResultTable::Search, key.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, b"v2".to_vec());
        assert_eq!(stored.hit_count, 0);
        assert!(stored.last_accessed_at.is_none());
    }

    #[tokio::test]
    async fn test_record_access_on_missing_row() {
        let backend = MemoryBackend::new();
        let updated = backend
            .record_access(ResultTable::Search, "missing", t0(), 1, t0())
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_record_access_skips_overwritten_row() {
        let backend = MemoryBackend::new();
        let first = row("POINT(0 0)", "v1", 60);
        let key = first.key.clone();
        backend.upsert_result(ResultTable::Search, first).await.unwrap();

        // Same timestamp as the first write: the version still advances
        backend
            .upsert_result(ResultTable::Search, row("POINT(0 0)", "v2", 60))
            .await
            .unwrap();
        let applied = backend
            .record_access(ResultTable::Search, key.as_str(), t0(), 1, t0())
            .await
            .unwrap();
        assert!(!applied);

        let stored = backend
            .get_result(ResultTable::Search, key.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.hit_count, 0);
        assert!(stored.updated_at > t0());
        assert!(backend
            .record_access(ResultTable::Search, key.as_str(), stored.updated_at, 1, t0())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired_and_aggregate() {
        let backend = MemoryBackend::new();
        backend.upsert_result(ResultTable::Search, row("POINT(0 0)", "a", 10)).await.unwrap();
        backend.upsert_result(ResultTable::Search, row("POINT(1 1)", "b", 100)).await.unwrap();

        let now = t0() + Duration::seconds(50);
        let agg = backend.result_aggregate(ResultTable::Search, now).await.unwrap();
        assert_eq!(agg.total_entries, 2);
        assert_eq!(agg.expired_entries, 1);

        let removed = backend
            .delete_expired_results(ResultTable::Search, now)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            backend.delete_all_results(ResultTable::Search).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_patch_unknown_order() {
        let backend = MemoryBackend::new();
        let patched = backend
            .patch_order("nope", &OrderUpdate::status("DONE"), t0())
            .await
            .unwrap();
        assert!(patched.is_none());
    }

    #[tokio::test]
    async fn test_order_aggregate_by_status() {
        let backend = MemoryBackend::new();
        for (id, status) in [("a", "PENDING"), ("b", "PENDING"), ("c", "COMPLETED")] {
            let order = OrderRow::from_payload(id, &json!({ "status": status }), t0()).unwrap();
            backend.upsert_order(order).await.unwrap();
        }

        let agg = backend.order_aggregate().await.unwrap();
        assert_eq!(agg.total_entries, 3);
        assert_eq!(agg.by_status.get("PENDING"), Some(&2));
        assert_eq!(agg.by_status.get("COMPLETED"), Some(&1));
        assert_eq!(agg.last_synced, Some(t0()));
    }
}
