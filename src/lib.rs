//! SQL Gateway Library
//!
//! A multi-tenant SQL access layer: callers supply MySQL credentials per
//! request, and the gateway pools connections per (endpoint, user), runs
//! statements and procedure calls under explicit transaction control, and
//! returns a uniform `{rows, fields, summary}` result.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod transport;

pub use config::{Config, PoolSettings};
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
