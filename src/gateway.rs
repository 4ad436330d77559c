//! Request-level safety net around the kernel.
//!
//! Each operation acquires a lease, runs one executor call, rolls back if the
//! call failed and always releases the lease. Rollback and release failures
//! are logged; they never replace the error or result of the call itself.

use crate::db::{
    ConnectionAcquirer, Driver, DriverConn, DriverConnection, LeasedConnection, PoolRegistry,
    ProcedureExecutor, QueryExecutor,
};
use crate::error::GatewayResult;
use crate::models::{Credentials, NormalizedResult, QueryRequest};
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

/// The four operations exposed to callers.
pub struct Gateway<D: Driver> {
    acquirer: ConnectionAcquirer<D>,
    queries: QueryExecutor,
    procedures: ProcedureExecutor,
}

impl<D: Driver> Gateway<D> {
    pub fn new(registry: Arc<PoolRegistry<D>>) -> Self {
        Self {
            acquirer: ConnectionAcquirer::new(registry),
            queries: QueryExecutor::new(),
            procedures: ProcedureExecutor::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<D>> {
        self.acquirer.registry()
    }

    /// Run a read statement.
    pub async fn select(
        &self,
        credentials: &Credentials,
        request: &QueryRequest,
    ) -> GatewayResult<NormalizedResult> {
        let span = info_span!("select", endpoint = %credentials.endpoint, user = %credentials.user);
        async {
            let mut lease = self.lease(credentials).await?;
            let result = self.queries.execute_select(&mut lease, request).await;
            finish(lease, result).await
        }
        .instrument(span)
        .await
    }

    /// Run an INSERT, UPDATE or DELETE and commit it.
    pub async fn write(
        &self,
        credentials: &Credentials,
        request: &QueryRequest,
    ) -> GatewayResult<NormalizedResult> {
        let span = info_span!("write", endpoint = %credentials.endpoint, user = %credentials.user);
        async {
            let mut lease = self.lease(credentials).await?;
            let result = self.queries.execute_write(&mut lease, request).await;
            finish(lease, result).await
        }
        .instrument(span)
        .await
    }

    /// Run a CALL with bound parameters and commit it.
    pub async fn procedure(
        &self,
        credentials: &Credentials,
        request: &QueryRequest,
    ) -> GatewayResult<NormalizedResult> {
        let span =
            info_span!("procedure", endpoint = %credentials.endpoint, user = %credentials.user);
        async {
            let mut lease = self.lease(credentials).await?;
            let result = self.procedures.execute_procedure(&mut lease, request).await;
            finish(lease, result).await
        }
        .instrument(span)
        .await
    }

    /// Run a CALL verbatim, without parameter binding, and commit it.
    pub async fn raw_procedure(
        &self,
        credentials: &Credentials,
        sql: &str,
    ) -> GatewayResult<NormalizedResult> {
        let span =
            info_span!("raw_procedure", endpoint = %credentials.endpoint, user = %credentials.user);
        async {
            let mut lease = self.lease(credentials).await?;
            let result = self.procedures.execute_raw_procedure(&mut lease, sql).await;
            finish(lease, result).await
        }
        .instrument(span)
        .await
    }

    async fn lease(
        &self,
        credentials: &Credentials,
    ) -> GatewayResult<LeasedConnection<DriverConn<D>>> {
        credentials.ensure_present()?;
        self.acquirer.acquire(credentials).await
    }
}

/// Roll back on failure, then release. The call's own outcome always wins.
async fn finish<C: DriverConnection, T>(
    mut lease: LeasedConnection<C>,
    result: GatewayResult<T>,
) -> GatewayResult<T> {
    if let Err(err) = &result {
        if lease.is_broken() {
            debug!(error = %err, "Skipping rollback on broken connection");
        } else if let Err(rollback_err) = lease.rollback().await {
            warn!(
                error = %err,
                rollback_error = %rollback_err,
                "Rollback after failed operation also failed"
            );
        }
    }

    let key = lease.key().clone();
    if let Err(release_err) = lease.release().await {
        warn!(
            endpoint = %key.endpoint(),
            user = %key.user(),
            error = %release_err,
            "Failed to release connection"
        );
    }

    result
}
