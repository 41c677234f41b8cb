//! Entity Cache Module
//!
//! Orders keyed by their upstream identifier. Rows never expire; they are
//! refreshed in place whenever the caller learns a newer state.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::clock::Clock;
use crate::cache::entry::{OrderFilter, OrderRow, OrderUpdate};
use crate::cache::stats::{EntityStats, SessionCounters};
use crate::error::{CacheError, Result};
use crate::storage::CacheBackend;

// == Order Cache ==
#[derive(Clone)]
pub struct OrderCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    session: Arc<SessionCounters>,
}

impl OrderCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            session: Arc::new(SessionCounters::new()),
        }
    }

    /// Cached order payload, or `None`. Storage and decode failures read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, entity_id: &str) -> Result<Option<T>> {
        validate_id(entity_id)?;

        let row = match self.backend.get_order(entity_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.session.record_miss();
                return Ok(None);
            }
            Err(e) => {
                self.session.record_error();
                self.session.record_miss();
                warn!(cache = "orders", entity_id, error = %e, "Order read failed, treating as miss");
                return Ok(None);
            }
        };

        match row.decode() {
            Ok(value) => {
                self.session.record_hit();
                Ok(Some(value))
            }
            Err(e) => {
                self.session.record_error();
                self.session.record_miss();
                warn!(cache = "orders", entity_id, error = %e, "Cached order undecodable, treating as miss");
                Ok(None)
            }
        }
    }

    /// Stored row with its indexed fields. Errors propagate.
    pub async fn inspect(&self, entity_id: &str) -> Result<Option<OrderRow>> {
        validate_id(entity_id)?;
        self.backend.get_order(entity_id).await
    }

    /// Stores or fully replaces an order.
    pub async fn set<T: Serialize>(&self, entity_id: &str, entity: &T) -> Result<()> {
        validate_id(entity_id)?;
        let payload = serde_json::to_value(entity).map_err(CacheError::unserializable)?;
        let row = OrderRow::from_payload(entity_id, &payload, self.clock.now())?;

        match self.backend.upsert_order(row).await {
            Ok(()) => debug!(cache = "orders", entity_id, "Cached order"),
            Err(e) => {
                self.session.record_error();
                warn!(cache = "orders", entity_id, error = %e, "Order write failed");
            }
        }
        Ok(())
    }

    /// Applies a partial update. Returns false when the order is not cached or
    /// the write failed.
    pub async fn update(&self, entity_id: &str, update: OrderUpdate) -> Result<bool> {
        validate_id(entity_id)?;

        match self
            .backend
            .patch_order(entity_id, &update, self.clock.now())
            .await
        {
            Ok(Some(row)) => {
                debug!(
                    cache = "orders",
                    entity_id,
                    status = row.fields.status.as_deref().unwrap_or("-"),
                    "Order updated"
                );
                Ok(true)
            }
            Ok(None) => {
                warn!(cache = "orders", entity_id, "Update for uncached order ignored");
                Ok(false)
            }
            Err(CacheError::MalformedInput(msg)) => Err(CacheError::MalformedInput(msg)),
            Err(e) => {
                self.session.record_error();
                warn!(cache = "orders", entity_id, error = %e, "Order update failed");
                Ok(false)
            }
        }
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>> {
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(CacheError::MalformedInput(format!(
                    "dateFrom {} is after dateTo {}",
                    from, to
                )));
            }
        }
        self.backend.list_orders(filter).await
    }

    pub async fn clear(&self, entity_id: &str) -> Result<bool> {
        validate_id(entity_id)?;
        self.backend.delete_order(entity_id).await
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.backend.delete_all_orders().await?;
        info!(cache = "orders", removed, "Cache cleared");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<EntityStats> {
        let aggregate = self.backend.order_aggregate().await?;
        Ok(EntityStats::from_aggregate(aggregate, self.session.snapshot()))
    }
}

fn validate_id(entity_id: &str) -> Result<()> {
    if entity_id.trim().is_empty() {
        return Err(CacheError::MalformedInput("order id cannot be empty".to_string()));
    }
    Ok(())
}
