//! SQLite storage backend.
//!
//! One connection guarded by a mutex; every call runs on the blocking pool via
//! `spawn_blocking`. Upserts are single `INSERT .. ON CONFLICT DO UPDATE`
//! statements, so two concurrent writes to the same key resolve as
//! last-writer-wins at the row level. Order patches run inside an immediate
//! transaction (read, patch, write back).
//!
//! Table names are interpolated into SQL only from `ResultTable::table_name`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use super::lock::mutex_lock;
use super::CacheBackend;
use crate::cache::clock::{from_millis, to_millis};
use crate::cache::{
    FilterProjection, OrderAggregate, OrderFields, OrderFilter, OrderRow, OrderUpdate,
    ResultAggregate, ResultRow, ResultTable,
};
use crate::error::Result;
use crate::keys::CacheKey;

const SOURCE: &str = "storage::sqlite";
const SCHEMA: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RESULT_COLUMNS: &str = "cache_key, geometry, date_from, date_to, filters, payload, \
     result_summary, created_at, updated_at, expires_at, hit_count, last_accessed_at";

const ORDER_COLUMNS: &str = "entity_id, entity_type, status, payload, label, geometry, \
     product_type, resolution, delivery_target, cost, ordered_at, completed_at, created_at, \
     last_synced_at";

// == SQLite Backend ==
/// Durable backend over a single SQLite database.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    durable: bool,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening SQLite cache database");
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        debug!(journal_mode = %mode, "SQLite pragmas applied");
        Self::init(conn, true)
    }

    /// Private in-memory database, gone when the backend is dropped.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, false)
    }

    fn init(conn: Connection, durable: bool) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        debug!("SQLite cache schema initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            durable,
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = mutex_lock(&conn, SOURCE, op);
            f(&mut guard)
        })
        .await?
    }
}

// == Row Mapping ==
fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => from_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    let hit_count: i64 = row.get(10)?;
    Ok(ResultRow {
        key: CacheKey::from_stored(row.get(0)?),
        projection: FilterProjection {
            geometry: row.get(1)?,
            date_from: row.get(2)?,
            date_to: row.get(3)?,
            filters: row.get(4)?,
        },
        payload: row.get(5)?,
        summary: row.get(6)?,
        created_at: time_at(row, 7)?,
        updated_at: time_at(row, 8)?,
        expires_at: time_at(row, 9)?,
        hit_count: hit_count.max(0) as u64,
        last_accessed_at: opt_time_at(row, 11)?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        entity_id: row.get(0)?,
        fields: OrderFields {
            entity_type: row.get(1)?,
            status: row.get(2)?,
            label: row.get(4)?,
            geometry: row.get(5)?,
            product_type: row.get(6)?,
            resolution: row.get(7)?,
            delivery_target: row.get(8)?,
            cost: row.get(9)?,
            ordered_at: opt_time_at(row, 10)?,
            completed_at: opt_time_at(row, 11)?,
        },
        payload: row.get(3)?,
        created_at: time_at(row, 12)?,
        last_synced_at: time_at(row, 13)?,
    })
}

fn write_order(conn: &Connection, row: &OrderRow) -> rusqlite::Result<usize> {
    let sql = format!(
        "INSERT INTO order_cache ({ORDER_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
         ON CONFLICT(entity_id) DO UPDATE SET \
             entity_type = excluded.entity_type, \
             status = excluded.status, \
             payload = excluded.payload, \
             label = excluded.label, \
             geometry = excluded.geometry, \
             product_type = excluded.product_type, \
             resolution = excluded.resolution, \
             delivery_target = excluded.delivery_target, \
             cost = excluded.cost, \
             ordered_at = excluded.ordered_at, \
             completed_at = excluded.completed_at, \
             last_synced_at = excluded.last_synced_at"
    );
    let f = &row.fields;
    conn.execute(
        &sql,
        params![
            row.entity_id,
            f.entity_type,
            f.status,
            row.payload,
            f.label,
            f.geometry,
            f.product_type,
            f.resolution,
            f.delivery_target,
            f.cost,
            f.ordered_at.map(to_millis),
            f.completed_at.map(to_millis),
            to_millis(row.created_at),
            to_millis(row.last_synced_at),
        ],
    )
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get_result(&self, table: ResultTable, key: &str) -> Result<Option<ResultRow>> {
        let key = key.to_string();
        self.run("get_result", move |conn| {
            let sql = format!(
                "SELECT {RESULT_COLUMNS} FROM {} WHERE cache_key = ?1",
                table.table_name()
            );
            Ok(conn
                .query_row(&sql, params![key], result_from_row)
                .optional()?)
        })
        .await
    }

    async fn upsert_result(&self, table: ResultTable, row: ResultRow) -> Result<()> {
        self.run("upsert_result", move |conn| {
            let sql = format!(
                "INSERT INTO {} ({RESULT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL) \
                 ON CONFLICT(cache_key) DO UPDATE SET \
                     geometry = excluded.geometry, \
                     date_from = excluded.date_from, \
                     date_to = excluded.date_to, \
                     filters = excluded.filters, \
                     payload = excluded.payload, \
                     result_summary = excluded.result_summary, \
                     updated_at = MAX(excluded.updated_at, updated_at + 1), \
                     expires_at = excluded.expires_at, \
                     hit_count = 0, \
                     last_accessed_at = NULL",
                table.table_name()
            );
            let p = &row.projection;
            conn.execute(
                &sql,
                params![
                    row.key.as_str(),
                    p.geometry,
                    p.date_from,
                    p.date_to,
                    p.filters,
                    row.payload,
                    row.summary,
                    to_millis(row.created_at),
                    to_millis(row.updated_at),
                    to_millis(row.expires_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_access(
        &self,
        table: ResultTable,
        key: &str,
        written_at: DateTime<Utc>,
        hits: u64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let key = key.to_string();
        let hits = i64::try_from(hits).unwrap_or(i64::MAX);
        self.run("record_access", move |conn| {
            let sql = format!(
                "UPDATE {} SET hit_count = hit_count + ?1, last_accessed_at = ?2 \
                 WHERE cache_key = ?3 AND updated_at = ?4",
                table.table_name()
            );
            let changed = conn.execute(
                &sql,
                params![hits, to_millis(at), key, to_millis(written_at)],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_result(&self, table: ResultTable, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.run("delete_result", move |conn| {
            let sql = format!("DELETE FROM {} WHERE cache_key = ?1", table.table_name());
            Ok(conn.execute(&sql, params![key])? > 0)
        })
        .await
    }

    async fn delete_all_results(&self, table: ResultTable) -> Result<u64> {
        self.run("delete_all_results", move |conn| {
            let sql = format!("DELETE FROM {}", table.table_name());
            Ok(conn.execute(&sql, [])? as u64)
        })
        .await
    }

    async fn delete_expired_results(&self, table: ResultTable, now: DateTime<Utc>) -> Result<u64> {
        self.run("delete_expired_results", move |conn| {
            let sql = format!("DELETE FROM {} WHERE expires_at <= ?1", table.table_name());
            Ok(conn.execute(&sql, params![to_millis(now)])? as u64)
        })
        .await
    }

    async fn result_aggregate(&self, table: ResultTable, now: DateTime<Utc>) -> Result<ResultAggregate> {
        self.run("result_aggregate", move |conn| {
            let sql = format!(
                "SELECT COUNT(*), \
                        COALESCE(SUM(CASE WHEN expires_at <= ?1 THEN 1 ELSE 0 END), 0), \
                        COALESCE(SUM(hit_count), 0), \
                        MAX(last_accessed_at) \
                 FROM {}",
                table.table_name()
            );
            Ok(conn.query_row(&sql, params![to_millis(now)], |row| {
                Ok(ResultAggregate {
                    total_entries: row.get::<_, i64>(0)?.max(0) as u64,
                    expired_entries: row.get::<_, i64>(1)?.max(0) as u64,
                    total_hits: row.get::<_, i64>(2)?.max(0) as u64,
                    last_accessed: opt_time_at(row, 3)?,
                })
            })?)
        })
        .await
    }

    async fn get_order(&self, entity_id: &str) -> Result<Option<OrderRow>> {
        let entity_id = entity_id.to_string();
        self.run("get_order", move |conn| {
            let sql = format!("SELECT {ORDER_COLUMNS} FROM order_cache WHERE entity_id = ?1");
            Ok(conn
                .query_row(&sql, params![entity_id], order_from_row)
                .optional()?)
        })
        .await
    }

    async fn upsert_order(&self, row: OrderRow) -> Result<()> {
        self.run("upsert_order", move |conn| {
            write_order(conn, &row)?;
            Ok(())
        })
        .await
    }

    async fn patch_order(
        &self,
        entity_id: &str,
        update: &OrderUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderRow>> {
        let entity_id = entity_id.to_string();
        let update = update.clone();
        self.run("patch_order", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sql = format!("SELECT {ORDER_COLUMNS} FROM order_cache WHERE entity_id = ?1");
            let Some(mut row) = tx
                .query_row(&sql, params![entity_id], order_from_row)
                .optional()?
            else {
                return Ok(None);
            };

            row.apply_update(&update, now)?;
            write_order(&tx, &row)?;
            tx.commit()?;
            Ok(Some(row))
        })
        .await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>> {
        let filter = filter.clone();
        self.run("list_orders", move |conn| {
            let sql = format!(
                "SELECT {ORDER_COLUMNS} FROM order_cache \
                 WHERE (?1 IS NULL OR entity_type = ?1) \
                   AND (?2 IS NULL OR status = ?2) \
                   AND (?3 IS NULL OR COALESCE(ordered_at, created_at) >= ?3) \
                   AND (?4 IS NULL OR COALESCE(ordered_at, created_at) <= ?4) \
                 ORDER BY ordered_at IS NULL, ordered_at DESC, created_at DESC, entity_id ASC \
                 LIMIT ?5 OFFSET ?6"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        filter.entity_type,
                        filter.status,
                        filter.date_from.map(to_millis),
                        filter.date_to.map(to_millis),
                        i64::from(filter.limit()),
                        i64::try_from(filter.offset()).unwrap_or(i64::MAX),
                    ],
                    order_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_order(&self, entity_id: &str) -> Result<bool> {
        let entity_id = entity_id.to_string();
        self.run("delete_order", move |conn| {
            Ok(conn.execute(
                "DELETE FROM order_cache WHERE entity_id = ?1",
                params![entity_id],
            )? > 0)
        })
        .await
    }

    async fn delete_all_orders(&self) -> Result<u64> {
        self.run("delete_all_orders", |conn| {
            Ok(conn.execute("DELETE FROM order_cache", [])? as u64)
        })
        .await
    }

    async fn order_aggregate(&self) -> Result<OrderAggregate> {
        self.run("order_aggregate", |conn| {
            let (total, last_synced) = conn.query_row(
                "SELECT COUNT(*), MAX(last_synced_at) FROM order_cache",
                [],
                |row| Ok((row.get::<_, i64>(0)?, opt_time_at(row, 1)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM order_cache \
                 WHERE status IS NOT NULL GROUP BY status",
            )?;
            let by_status = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            Ok(OrderAggregate {
                total_entries: total.max(0) as u64,
                by_status,
                last_synced,
            })
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.run("health_check", |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
