//! Data models for the SQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{Credentials, Endpoint, PoolKey};
pub use query::{
    ExecutionSummary, FieldDescriptor, NormalizedResult, QueryParam, QueryRequest, Record,
};
