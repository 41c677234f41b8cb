//! Cache Statistics Module
//!
//! Aggregate counts computed by the storage backends plus the in-process
//! hit/miss counters each cache keeps for observability.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Storage Aggregates ==
/// Raw aggregate over a result table, as returned by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultAggregate {
    pub total_entries: u64,
    pub expired_entries: u64,
    pub total_hits: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Raw aggregate over the order table, as returned by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderAggregate {
    pub total_entries: u64,
    pub by_status: BTreeMap<String, u64>,
    pub last_synced: Option<DateTime<Utc>>,
}

// == Session Counters ==
/// Lock-free hit/miss counters for the lifetime of this process.
#[derive(Debug, Default)]
pub struct SessionCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Absorbed storage failures.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

/// Point-in-time copy of `SessionCounters`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

impl SessionStats {
    pub fn new(hits: u64, misses: u64, errors: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            errors,
            hit_rate,
        }
    }
}

// == TTL Cache Stats ==
/// Statistics for one TTL result cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TtlStats {
    pub total_entries: u64,
    /// Rows past `expires_at` that have not been swept yet
    pub expired_entries: u64,
    pub total_hits: u64,
    pub avg_hits: f64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub session: SessionStats,
}

impl TtlStats {
    pub fn from_aggregate(agg: ResultAggregate, session: SessionStats) -> Self {
        let avg_hits = if agg.total_entries == 0 {
            0.0
        } else {
            agg.total_hits as f64 / agg.total_entries as f64
        };
        Self {
            total_entries: agg.total_entries,
            expired_entries: agg.expired_entries,
            total_hits: agg.total_hits,
            avg_hits,
            last_accessed: agg.last_accessed,
            session,
        }
    }

    /// Entries still servable.
    pub fn live_entries(&self) -> u64 {
        self.total_entries.saturating_sub(self.expired_entries)
    }
}

// == Entity Cache Stats ==
/// Statistics for the order cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityStats {
    pub total_entries: u64,
    pub by_status: BTreeMap<String, u64>,
    pub last_synced: Option<DateTime<Utc>>,
    pub session: SessionStats,
}

impl EntityStats {
    pub fn from_aggregate(agg: OrderAggregate, session: SessionStats) -> Self {
        Self {
            total_entries: agg.total_entries,
            by_status: agg.by_status,
            last_synced: agg.last_synced,
            session,
        }
    }
}
