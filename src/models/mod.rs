//! Request and Response models for the maintenance API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{OrderListQuery, UpdateOrderRequest};
pub use responses::{
    DeleteResponse, ErrorResponse, HealthResponse, OrderListResponse, OrderResponse,
    RemovedResponse, StatsResponse,
};
