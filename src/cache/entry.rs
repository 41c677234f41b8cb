//! Cache Entry Module
//!
//! Row model shared by the cache services and the storage backends: TTL result
//! rows, order rows, and the partial-update / listing descriptors for orders.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::cache::clock::truncate_millis;
use crate::error::Result;
use crate::keys::{normalize_wkt, CacheKey};

// == Result Tables ==
/// One storage table per cached query kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTable {
    Search,
    Feasibility,
}

impl ResultTable {
    pub const ALL: [ResultTable; 2] = [ResultTable::Search, ResultTable::Feasibility];

    pub fn table_name(self) -> &'static str {
        match self {
            ResultTable::Search => "search_cache",
            ResultTable::Feasibility => "feasibility_cache",
        }
    }

    /// Short name used in logs.
    pub fn label(self) -> &'static str {
        match self {
            ResultTable::Search => "search",
            ResultTable::Feasibility => "feasibility",
        }
    }
}

// == Filter Projection ==
/// Denormalized copies of the request, kept for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterProjection {
    pub geometry: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    /// Canonical text of the remaining normalized fields
    pub filters: Option<String>,
}

// == Result Row ==
/// A cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub key: CacheKey,
    pub projection: FilterProjection,
    /// Serialized upstream response
    pub payload: Vec<u8>,
    /// Derived scalar for inspection without decoding `payload`
    pub summary: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl ResultRow {
    /// Builds a cold row: zero hits, never accessed.
    pub fn fresh(
        key: CacheKey,
        projection: FilterProjection,
        payload: Vec<u8>,
        summary: Option<f64>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            projection,
            payload,
            summary,
            created_at: now,
            updated_at: now,
            expires_at: truncate_millis(expires_at),
            hit_count: 0,
            last_accessed_at: None,
        }
    }

    /// An entry is expired once `now` reaches `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.is_expired(now) {
            Duration::zero()
        } else {
            self.expires_at - now
        }
    }

    /// Overwrite semantics shared by every backend: everything is replaced except
    /// the original creation time, and accounting starts over. `updated_at`
    /// advances by at least one millisecond.
    pub fn overwrite_with(&mut self, incoming: ResultRow) {
        let created_at = self.created_at;
        let floor = self.updated_at + Duration::milliseconds(1);
        *self = incoming;
        self.created_at = created_at;
        self.updated_at = self.updated_at.max(floor);
        self.hit_count = 0;
        self.last_accessed_at = None;
    }

    pub fn meta(&self, now: DateTime<Utc>) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            projection: self.projection.clone(),
            summary: self.summary,
            payload_bytes: self.payload.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            expired: self.is_expired(now),
            ttl_remaining_secs: self.ttl_remaining(now).num_seconds(),
            hit_count: self.hit_count,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

/// Diagnostic view of a result row, without the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryMeta {
    pub key: CacheKey,
    pub projection: FilterProjection,
    pub summary: Option<f64>,
    pub payload_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub ttl_remaining_secs: i64,
    pub hit_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

// == Order Fields ==
/// Order attributes mirrored out of the payload for filtering and sorting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFields {
    pub entity_type: Option<String>,
    pub status: Option<String>,
    pub label: Option<String>,
    pub geometry: Option<String>,
    pub product_type: Option<String>,
    pub resolution: Option<String>,
    pub delivery_target: Option<String>,
    pub cost: Option<f64>,
    pub ordered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderFields {
    /// Derives the denormalized fields from an upstream order representation.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            entity_type: text_field(payload, &["orderType", "type"]),
            status: text_field(payload, &["status"]),
            label: text_field(payload, &["orderLabel", "label"]),
            geometry: text_field(payload, &["aoi"]).map(|g| normalize_wkt(&g)),
            product_type: text_field(payload, &["productType"]),
            resolution: text_field(payload, &["resolution"]),
            delivery_target: text_field(payload, &["deliveryDriver"]),
            cost: number_field(payload, &["orderCost", "cost"]),
            ordered_at: time_field(payload, &["orderedAt", "createdAt"]),
            completed_at: time_field(payload, &["completedAt"]),
        }
    }
}

fn first<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| payload.get(name))
        .find(|v| !v.is_null())
}

fn text_field(payload: &Value, names: &[&str]) -> Option<String> {
    match first(payload, names)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(payload: &Value, names: &[&str]) -> Option<f64> {
    match first(payload, names)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn time_field(payload: &Value, names: &[&str]) -> Option<DateTime<Utc>> {
    let raw = first(payload, names)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| truncate_millis(t.with_timezone(&Utc)))
}

// == Order Row ==
/// A cached order, keyed by its upstream identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub entity_id: String,
    pub fields: OrderFields,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn from_payload(entity_id: impl Into<String>, payload: &Value, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            entity_id: entity_id.into(),
            fields: OrderFields::from_payload(payload),
            payload: serde_json::to_vec(payload)?,
            created_at: now,
            last_synced_at: now,
        })
    }

    /// Decodes the stored payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Full replacement keeping the first-seen creation time.
    pub fn overwrite_with(&mut self, incoming: OrderRow) {
        let created_at = self.created_at;
        *self = incoming;
        self.created_at = created_at;
    }

    /// Applies a partial update in place.
    ///
    /// A supplied payload replaces the stored one first; explicit status and
    /// completion time then override and are written back into the payload so the
    /// two never disagree. `last_synced_at` is always refreshed.
    pub fn apply_update(&mut self, update: &OrderUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(ref payload) = update.payload {
            self.fields = OrderFields::from_payload(payload);
            self.payload = serde_json::to_vec(payload)?;
        }

        if let Some(ref status) = update.status {
            self.fields.status = Some(status.clone());
        }
        if let Some(completed_at) = update.completed_at {
            self.fields.completed_at = Some(truncate_millis(completed_at));
        }
        if update.status.is_some() || update.completed_at.is_some() {
            self.patch_payload(update)?;
        }

        self.last_synced_at = now;
        Ok(())
    }

    fn patch_payload(&mut self, update: &OrderUpdate) -> Result<()> {
        let mut object: Map<String, Value> = match serde_json::from_slice(&self.payload) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(
                    entity_id = %self.entity_id,
                    "Cached order payload is not a JSON object; status kept only in indexed fields"
                );
                return Ok(());
            }
        };

        if let Some(ref status) = update.status {
            object.insert("status".to_string(), Value::String(status.clone()));
        }
        if let Some(completed_at) = update.completed_at {
            object.insert(
                "completedAt".to_string(),
                Value::String(completed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }

        self.payload = serde_json::to_vec(&Value::Object(object))?;
        Ok(())
    }

    /// Instant used for date filtering: when ordered, else when first cached.
    pub fn effective_ordered_at(&self) -> DateTime<Utc> {
        self.fields.ordered_at.unwrap_or(self.created_at)
    }

    /// Listing order: ordered_at descending with nulls last, then created_at
    /// descending, then id for a stable tiebreak.
    pub fn listing_order(a: &OrderRow, b: &OrderRow) -> Ordering {
        let by_ordered = match (a.fields.ordered_at, b.fields.ordered_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_ordered
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    }
}

// == Order Update ==
/// Partial update of a cached order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl OrderUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.completed_at.is_none() && self.payload.is_none()
    }
}

// == Order Filter ==
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Listing criteria for cached orders. Pages are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFilter {
    pub entity_type: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            entity_type: None,
            status: None,
            date_from: None,
            date_to: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl OrderFilter {
    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }

    pub fn matches(&self, row: &OrderRow) -> bool {
        if let Some(ref t) = self.entity_type {
            if row.fields.entity_type.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(ref s) = self.status {
            if row.fields.status.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        let at = row.effective_ordered_at();
        if self.date_from.is_some_and(|from| at < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| at > to) {
            return false;
        }
        true
    }
}
