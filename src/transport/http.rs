//! HTTP transport for the SQL gateway.
//!
//! Every operation is a JSON `POST` carrying credentials next to the
//! statement. Successful calls answer `{rows, fields, summary}`; failures
//! answer `{"error": "<message>"}` with a status derived from the error class.

use crate::db::Driver;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::models::{Credentials, NormalizedResult, QueryRequest};
use crate::transport::Transport;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{Instrument, error, info, info_span, warn};

/// Request body shared by every statement route.
#[derive(Debug, Deserialize)]
pub struct StatementBody {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(flatten)]
    pub request: QueryRequest,
}

/// Error wrapper that renders as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

/// HTTP status for each error class.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Validation { .. } | GatewayError::QueryExecution { .. } => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::TransientConnection { .. } | GatewayError::Backpressure { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        GatewayError::Connection { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Release { .. } | GatewayError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult = Result<Json<NormalizedResult>, ApiError>;

/// Build the gateway router.
pub fn router<D: Driver>(gateway: Arc<Gateway<D>>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/query/select", post(select::<D>))
        .route("/query/write", post(write::<D>))
        .route("/procedure", post(procedure::<D>))
        .route("/procedure/raw", post(raw_procedure::<D>))
        .route("/health", get(health::<D>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(gateway)
}

fn request_span(operation: &'static str) -> tracing::Span {
    info_span!("request", request_id = %uuid::Uuid::new_v4(), operation)
}

fn parse_body(body: Result<Json<StatementBody>, JsonRejection>) -> GatewayResult<StatementBody> {
    let Json(body) = body.map_err(|rejection| GatewayError::validation(rejection.body_text()))?;
    body.credentials.ensure_present()?;
    Ok(body)
}

async fn select<D: Driver>(
    State(gateway): State<Arc<Gateway<D>>>,
    body: Result<Json<StatementBody>, JsonRejection>,
) -> ApiResult {
    let body = parse_body(body)?;
    let result = gateway
        .select(&body.credentials, &body.request)
        .instrument(request_span("select"))
        .await?;
    Ok(Json(result))
}

async fn write<D: Driver>(
    State(gateway): State<Arc<Gateway<D>>>,
    body: Result<Json<StatementBody>, JsonRejection>,
) -> ApiResult {
    let body = parse_body(body)?;
    let result = gateway
        .write(&body.credentials, &body.request)
        .instrument(request_span("write"))
        .await?;
    Ok(Json(result))
}

async fn procedure<D: Driver>(
    State(gateway): State<Arc<Gateway<D>>>,
    body: Result<Json<StatementBody>, JsonRejection>,
) -> ApiResult {
    let body = parse_body(body)?;
    let result = gateway
        .procedure(&body.credentials, &body.request)
        .instrument(request_span("procedure"))
        .await?;
    Ok(Json(result))
}

async fn raw_procedure<D: Driver>(
    State(gateway): State<Arc<Gateway<D>>>,
    body: Result<Json<StatementBody>, JsonRejection>,
) -> ApiResult {
    let body = parse_body(body)?;
    if !body.request.params.is_empty() {
        return Err(GatewayError::validation("raw procedure calls do not accept params").into());
    }
    let result = gateway
        .raw_procedure(&body.credentials, &body.request.sql)
        .instrument(request_span("raw_procedure"))
        .await?;
    Ok(Json(result))
}

async fn health<D: Driver>(State(gateway): State<Arc<Gateway<D>>>) -> Json<serde_json::Value> {
    let pools = gateway.registry().pool_count().await;
    Json(json!({ "status": "ok", "pools": pools }))
}

/// HTTP transport implementation.
pub struct HttpTransport<D: Driver> {
    gateway: Arc<Gateway<D>>,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
    max_body_bytes: usize,
}

impl<D: Driver> HttpTransport<D> {
    /// Create a new HTTP transport.
    ///
    /// # Arguments
    ///
    /// * `gateway` - Shared gateway all routes dispatch to
    /// * `host` - Host address to bind to
    /// * `port` - Port to bind to
    /// * `max_body_bytes` - Largest accepted request body
    pub fn new(
        gateway: Arc<Gateway<D>>,
        host: impl Into<String>,
        port: u16,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            gateway,
            host: host.into(),
            port,
            max_body_bytes,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl<D: Driver> Transport for HttpTransport<D> {
    async fn run(&self) -> GatewayResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting SQL gateway on {}", bind_addr);

        let app = router(Arc::clone(&self.gateway), self.max_body_bytes);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        // Requests in flight get this long to finish once shutdown starts
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(GatewayError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing connection pools");
        self.gateway.registry().close_all().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
