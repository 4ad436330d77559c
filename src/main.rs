//! SQL Gateway - Main entry point.
//!
//! Serves pooled MySQL statement and procedure execution over HTTP.

use clap::Parser;
use sql_gateway::config::Config;
use sql_gateway::db::{MySqlDriver, PoolRegistry};
use sql_gateway::gateway::Gateway;
use sql_gateway::transport::{HttpTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    let settings = config.pool_settings();
    if let Err(message) = settings.validate() {
        eprintln!("Error: invalid pool configuration: {}", message);
        std::process::exit(1);
    }

    info!(
        max_connections = settings.max_connections,
        connect_timeout_secs = config.connect_timeout,
        query_timeout_secs = config.query_timeout,
        acquire_timeout_secs = config.acquire_timeout,
        "Starting SQL Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = PoolRegistry::new(MySqlDriver::new(), settings);
    let gateway = Arc::new(Gateway::new(registry));

    let transport = HttpTransport::new(
        gateway,
        &config.http_host,
        config.http_port,
        config.max_body_bytes,
    );

    if let Err(e) = transport.run().await {
        error!(error = %e, transport = transport.name(), "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
