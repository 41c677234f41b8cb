//! API Handlers
//!
//! HTTP request handlers for the maintenance endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tokio::task::JoinHandle;

use crate::cache::{CacheContext, SystemClock};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, HealthResponse, OrderListQuery, OrderListResponse, OrderResponse,
    RemovedResponse, StatsResponse, UpdateOrderRequest,
};
use crate::storage::open_backend;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub caches: CacheContext,
}

impl AppState {
    /// Creates a new AppState around existing cache handles.
    pub fn new(caches: CacheContext) -> Self {
        Self { caches }
    }

    /// Opens the configured backend and starts the accounting worker.
    ///
    /// Returns the state and the worker's JoinHandle.
    pub fn from_config(config: &Config) -> Result<(Self, JoinHandle<()>)> {
        let backend = open_backend(config)?;
        let (caches, worker) = CacheContext::start(
            backend,
            Arc::new(SystemClock),
            config.default_ttl,
            config.accounting_queue_capacity,
        );
        Ok((Self::new(caches), worker))
    }
}

/// Cache segment addressed by `/cache/:cache`.
enum Segment {
    Searches,
    Feasibility,
    Orders,
}

impl Segment {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "searches" => Ok(Segment::Searches),
            "feasibility" => Ok(Segment::Feasibility),
            "orders" => Ok(Segment::Orders),
            other => Err(CacheError::NotFound(format!("Unknown cache '{}'", other))),
        }
    }
}

/// Handler for GET /health
///
/// Probes the storage backend.
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let backend = state.caches.backend();
    backend.health_check().await?;
    Ok(Json(HealthResponse::healthy(
        backend.backend_name(),
        backend.is_durable(),
    )))
}

/// Handler for GET /stats
///
/// Returns statistics for all three caches.
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let caches = &state.caches;
    Ok(Json(StatsResponse {
        searches: caches.searches.stats().await?,
        feasibility: caches.feasibility.stats().await?,
        orders: caches.orders.stats().await?,
        dropped_accesses: caches.recorder().dropped(),
    }))
}

/// Handler for DELETE /cache/:cache
///
/// Removes every entry of one cache.
pub async fn clear_cache_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<RemovedResponse>> {
    let removed = match Segment::parse(&cache)? {
        Segment::Searches => state.caches.searches.clear_all().await?,
        Segment::Feasibility => state.caches.feasibility.clear_all().await?,
        Segment::Orders => state.caches.orders.clear_all().await?,
    };
    Ok(Json(RemovedResponse::new(cache, removed)))
}

/// Handler for POST /cache/:cache/sweep
///
/// Removes expired entries of one TTL cache.
pub async fn sweep_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<RemovedResponse>> {
    let removed = match Segment::parse(&cache)? {
        Segment::Searches => state.caches.searches.clear_expired().await?,
        Segment::Feasibility => state.caches.feasibility.clear_expired().await?,
        Segment::Orders => {
            return Err(CacheError::MalformedInput(
                "Orders do not expire; use DELETE /cache/orders".to_string(),
            ))
        }
    };
    Ok(Json(RemovedResponse::new(cache, removed)))
}

/// Handler for GET /orders
pub async fn list_orders_handler(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderListResponse>> {
    let filter = query.into_filter()?;
    let orders = state
        .caches
        .orders
        .list(&filter)
        .await?
        .into_iter()
        .map(OrderResponse::from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(OrderListResponse {
        count: orders.len(),
        orders,
        page: filter.page,
        page_size: filter.limit(),
    }))
}

/// Handler for GET /orders/:id
pub async fn get_order_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>> {
    let row = state
        .caches
        .orders
        .inspect(&id)
        .await?
        .ok_or_else(|| CacheError::NotFound(format!("Order '{}' not cached", id)))?;
    Ok(Json(OrderResponse::from_row(row)?))
}

/// Handler for PATCH /orders/:id
///
/// Applies a partial update and returns the refreshed order.
pub async fn update_order_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<OrderResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::MalformedInput(error_msg));
    }

    let orders = &state.caches.orders;
    if !orders.update(&id, req.into()).await? {
        return Err(CacheError::NotFound(format!("Order '{}' not cached", id)));
    }

    let row = orders
        .inspect(&id)
        .await?
        .ok_or_else(|| CacheError::NotFound(format!("Order '{}' not cached", id)))?;
    Ok(Json(OrderResponse::from_row(row)?))
}

/// Handler for DELETE /orders/:id
pub async fn delete_order_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.caches.orders.clear(&id).await? {
        return Err(CacheError::NotFound(format!("Order '{}' not cached", id)));
    }
    Ok(Json(DeleteResponse::new(id)))
}
