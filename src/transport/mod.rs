//! Transport layer for the SQL gateway.
//!
//! The gateway is served over HTTP; the trait keeps the server loop separate
//! from the kernel it dispatches to.

pub mod http;

pub use http::{HttpTransport, router};

use crate::error::GatewayResult;
use std::future::Future;

/// Trait for gateway transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling requests.
    ///
    /// This method should block until the transport is shut down.
    fn run(&self) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
