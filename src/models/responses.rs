//! Response DTOs for the maintenance API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{EntityStats, OrderFields, OrderRow, TtlStats};
use crate::error::Result;

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub searches: TtlStats,
    pub feasibility: TtlStats,
    pub orders: EntityStats,
    /// Access records lost to a full accounting queue
    pub dropped_accesses: u64,
}

/// Response body for clear and sweep operations
#[derive(Debug, Clone, Serialize)]
pub struct RemovedResponse {
    pub cache: String,
    pub removed: u64,
}

impl RemovedResponse {
    pub fn new(cache: impl Into<String>, removed: u64) -> Self {
        Self {
            cache: cache.into(),
            removed,
        }
    }
}

/// A cached order as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    #[serde(flatten)]
    pub fields: OrderFields,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_row(row: OrderRow) -> Result<Self> {
        let payload = row.decode()?;
        Ok(Self {
            id: row.entity_id,
            fields: row.fields,
            payload,
            created_at: row.created_at,
            last_synced_at: row.last_synced_at,
        })
    }
}

/// Response body for `GET /orders`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub page: u32,
    pub page_size: u32,
    pub count: usize,
}

/// Response body for `DELETE /orders/:id`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The order that was removed
    pub id: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            message: format!("Order '{}' removed from cache", id),
            id,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Storage engine name
    pub backend: String,
    /// Whether cached data survives a restart
    pub durable: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(backend: impl Into<String>, durable: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            backend: backend.into(),
            durable,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
