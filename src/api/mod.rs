//! API Module
//!
//! HTTP handlers and routing for the cache maintenance API.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache statistics
//! - `DELETE /cache/:cache` - Clear one cache
//! - `POST /cache/:cache/sweep` - Remove expired entries
//! - `GET /orders`, `GET|PATCH|DELETE /orders/:id` - Cached orders

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
