//! Request DTOs for the maintenance API
//!
//! Defines the structure of incoming query strings and request bodies.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{OrderFilter, OrderUpdate, DEFAULT_PAGE_SIZE};
use crate::error::{CacheError, Result};

/// Query string of `GET /orders`.
///
/// Dates accept RFC 3339 timestamps or plain `YYYY-MM-DD` days; a plain
/// `dateTo` covers the whole day.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl OrderListQuery {
    pub fn into_filter(self) -> Result<OrderFilter> {
        Ok(OrderFilter {
            entity_type: non_empty(self.entity_type),
            status: non_empty(self.status),
            date_from: parse_bound(self.date_from.as_deref(), "dateFrom", NaiveTime::MIN)?,
            date_to: parse_bound(self.date_to.as_deref(), "dateTo", end_of_day())?,
            page: self.page.unwrap_or(1).max(1),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

fn parse_bound(raw: Option<&str>, field: &str, day_time: NaiveTime) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|day| Some(day.and_time(day_time).and_utc()))
        .map_err(|_| CacheError::MalformedInput(format!("{} is not a date: '{}'", field, raw)))
}

/// Request body of `PATCH /orders/:id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Full replacement payload
    #[serde(default)]
    pub payload: Option<Value>,
}

impl UpdateOrderRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.status.is_none() && self.completed_at.is_none() && self.payload.is_none() {
            return Some("Update must set status, completedAt or payload".to_string());
        }
        if self.status.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Some("Status cannot be empty".to_string());
        }
        if self.payload.as_ref().is_some_and(|p| !p.is_object()) {
            return Some("Payload must be a JSON object".to_string());
        }
        None
    }
}

impl From<UpdateOrderRequest> for OrderUpdate {
    fn from(req: UpdateOrderRequest) -> Self {
        OrderUpdate {
            status: req.status,
            completed_at: req.completed_at,
            payload: req.payload,
        }
    }
}
