//! API Routes
//!
//! Configures the Axum router with all maintenance endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_cache_handler, delete_order_handler, get_order_handler, health_handler,
    list_orders_handler, stats_handler, sweep_handler, update_order_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Storage health probe
/// - `GET /stats` - Statistics for every cache
/// - `DELETE /cache/:cache` - Clear `searches`, `feasibility` or `orders`
/// - `POST /cache/:cache/sweep` - Remove expired entries of a TTL cache
/// - `GET /orders` - List cached orders
/// - `GET|PATCH|DELETE /orders/:id` - Inspect, update or evict one order
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/cache/:cache", delete(clear_cache_handler))
        .route("/cache/:cache/sweep", post(sweep_handler))
        .route("/orders", get(list_orders_handler))
        .route(
            "/orders/:id",
            get(get_order_handler)
                .patch(update_order_handler)
                .delete(delete_order_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
