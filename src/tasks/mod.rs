//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: Removes expired rows from the TTL caches at configured intervals

mod cleanup;

pub use cleanup::{spawn_cleanup_task, sweep_once};
