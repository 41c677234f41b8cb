//! Configuration Module
//!
//! Handles loading and managing service configuration from environment variables.

use std::env;
use std::path::PathBuf;

/// Default TTL for both result caches: 24 hours.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// Which storage engine backs the caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Durable SQLite database at `database_path`
    Sqlite,
    /// Process-local maps, lost on restart
    Memory,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(BackendKind::Sqlite),
            "memory" => Some(BackendKind::Memory),
            _ => None,
        }
    }
}

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage engine
    pub backend: BackendKind,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Default TTL in seconds for result caches
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Capacity of the hit-accounting queue
    pub accounting_queue_capacity: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_BACKEND` - `sqlite` or `memory` (default: sqlite)
    /// - `DATABASE_PATH` - SQLite file (default: imagery_cache.db)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 86400)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 3600)
    /// - `ACCOUNTING_QUEUE_CAPACITY` - Pending hit updates before dropping (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: env::var("CACHE_BACKEND")
                .ok()
                .and_then(|v| BackendKind::parse(&v))
                .unwrap_or(defaults.backend),
            database_path: env::var("DATABASE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            default_ttl: env::var("DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_ttl),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            cleanup_interval: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.cleanup_interval),
            accounting_queue_capacity: env::var("ACCOUNTING_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.accounting_queue_capacity),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            database_path: PathBuf::from("imagery_cache.db"),
            default_ttl: DEFAULT_TTL_SECONDS,
            server_port: 3000,
            cleanup_interval: 3600,
            accounting_queue_capacity: 1024,
        }
    }
}
