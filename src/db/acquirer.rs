//! Connection acquisition with one rebuild-and-retry on transient failure.

use crate::db::driver::{Driver, DriverConnection, DriverPool, RawProcedureResult, RowSet};
use crate::db::registry::{HealthCallback, PoolRegistry};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{Credentials, ExecutionSummary, PoolKey, QueryParam};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// First attempt plus one retry against a rebuilt pool.
pub const MAX_ACQUIRE_ATTEMPTS: u32 = 2;

/// Connection type handed out for a driver.
pub type DriverConn<D> = <<D as Driver>::Pool as DriverPool>::Conn;

/// Obtains validated, transaction-ready connections from the registry.
pub struct ConnectionAcquirer<D: Driver> {
    registry: Arc<PoolRegistry<D>>,
}

impl<D: Driver> ConnectionAcquirer<D> {
    pub fn new(registry: Arc<PoolRegistry<D>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<D>> {
        &self.registry
    }

    /// Lease a connection with autocommit disabled.
    ///
    /// A transient failure on the first attempt retires the pool generation
    /// it came from and retries once. If a concurrent request already
    /// rebuilt the pool, the retry reuses that pool. Anything else
    /// propagates unchanged.
    pub async fn acquire(
        &self,
        credentials: &Credentials,
    ) -> GatewayResult<LeasedConnection<DriverConn<D>>> {
        let key = credentials.pool_key();
        let mut attempt = 1;

        loop {
            let start = Instant::now();
            match self.try_acquire(credentials).await {
                Ok(lease) => {
                    debug!(
                        endpoint = %key.endpoint(),
                        user = %key.user(),
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Acquired connection"
                    );
                    return Ok(lease);
                }
                Err(failed) if failed.error.is_transient() && attempt < MAX_ACQUIRE_ATTEMPTS => {
                    warn!(
                        endpoint = %key.endpoint(),
                        user = %key.user(),
                        attempt,
                        generation = ?failed.generation,
                        error = %failed.error,
                        "Transient acquire failure, rebuilding pool"
                    );
                    match failed.generation {
                        Some(generation) => {
                            self.registry.invalidate_generation(&key, generation).await;
                        }
                        None => {
                            self.registry.invalidate(&key).await;
                        }
                    }
                    attempt += 1;
                }
                Err(failed) => return Err(failed.error),
            }
        }
    }

    async fn try_acquire(
        &self,
        credentials: &Credentials,
    ) -> Result<LeasedConnection<DriverConn<D>>, AttemptFailure> {
        let entry = self
            .registry
            .get_or_create(credentials)
            .await
            .map_err(|error| AttemptFailure {
                error,
                generation: None,
            })?;
        let generation = Some(entry.generation());
        let failed = |error: GatewayError| AttemptFailure { error, generation };

        let mut conn = entry.pool().lease().await.map_err(failed)?;

        if let Err(err) = prepare(&mut conn).await {
            if let Err(release_err) = conn.release().await {
                warn!(
                    endpoint = %entry.key().endpoint(),
                    error = %release_err,
                    "Failed to release partially acquired connection"
                );
            }
            return Err(failed(err));
        }

        Ok(LeasedConnection::new(
            conn,
            entry.key().clone(),
            entry.health_callback(),
        ))
    }
}

/// Why one acquire attempt failed, and which pool generation it ran against.
struct AttemptFailure {
    error: GatewayError,
    generation: Option<u64>,
}

/// Probe liveness, then open the lease's manual transaction.
async fn prepare<C: DriverConnection>(conn: &mut C) -> GatewayResult<()> {
    conn.ping().await?;
    conn.set_autocommit(false).await
}

/// A connection checked out for the duration of one request.
///
/// Every operation result passes through the pool's health callback, so a
/// fatal error seen mid-request retires the pool. Call [`release`] on every
/// exit path; dropping an unreleased lease releases it in the background and
/// logs a warning.
///
/// [`release`]: LeasedConnection::release
pub struct LeasedConnection<C: DriverConnection> {
    conn: Option<C>,
    key: PoolKey,
    on_fatal: HealthCallback,
}

impl<C: DriverConnection> LeasedConnection<C> {
    pub fn new(conn: C, key: PoolKey, on_fatal: HealthCallback) -> Self {
        Self {
            conn: Some(conn),
            key,
            on_fatal,
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    fn conn(&mut self) -> GatewayResult<&mut C> {
        self.conn
            .as_mut()
            .ok_or_else(|| GatewayError::internal("connection already released"))
    }

    fn observe<T>(&self, result: GatewayResult<T>) -> GatewayResult<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                (self.on_fatal)(err);
            }
        }
        result
    }

    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> GatewayResult<RowSet> {
        let result = self.conn()?.query(sql, params).await;
        self.observe(result)
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> GatewayResult<ExecutionSummary> {
        let result = self.conn()?.execute(sql, params).await;
        self.observe(result)
    }

    pub async fn call(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> GatewayResult<RawProcedureResult> {
        let result = self.conn()?.call(sql, params).await;
        self.observe(result)
    }

    pub async fn commit(&mut self) -> GatewayResult<()> {
        let result = self.conn()?.commit().await;
        self.observe(result)
    }

    pub async fn rollback(&mut self) -> GatewayResult<()> {
        let result = self.conn()?.rollback().await;
        self.observe(result)
    }

    pub fn is_broken(&self) -> bool {
        self.conn.as_ref().is_none_or(|conn| conn.is_broken())
    }

    /// Return the connection to its pool.
    pub async fn release(mut self) -> GatewayResult<()> {
        match self.conn.take() {
            Some(conn) => conn.release().await,
            None => Ok(()),
        }
    }
}

impl<C: DriverConnection> Drop for LeasedConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        warn!(
            endpoint = %self.key.endpoint(),
            user = %self.key.user(),
            "Connection released via Drop - consider using explicit release()"
        );

        // Spawn a task to handle async release; outside a runtime the
        // connection is simply dropped
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = conn.release().await {
                    warn!(error = %e, "Background release failed");
                }
            });
        }
    }
}

impl<C: DriverConnection> std::fmt::Debug for LeasedConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedConnection")
            .field("key", &self.key)
            .field("released", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}
