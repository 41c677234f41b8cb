//! Imagery Cache - persistent, deterministic cache in front of an imagery-ordering API
//!
//! Archive searches and feasibility checks are cached with a TTL under keys
//! derived from their normalized parameters; orders are cached by id and
//! refreshed in place.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod storage;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheContext, FeasibilityCache, OrderCache, SearchCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
