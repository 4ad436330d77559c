//! Driver seam between the pooling kernel and a concrete database client.
//!
//! The registry, acquirer and executors only talk to these traits, so the
//! same kernel runs against the sqlx MySQL driver in production and against
//! a scripted in-memory driver in tests.

use crate::config::PoolSettings;
use crate::error::GatewayResult;
use crate::models::{Credentials, Endpoint, ExecutionSummary, QueryParam, Record};
use std::future::Future;

/// Column metadata as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Protocol column-type code, when the driver can recover it
    pub type_code: Option<u16>,
    /// The driver's own name for the column type
    pub driver_type: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_code: u16, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_code: Some(type_code),
            driver_type: String::new(),
            nullable,
        }
    }
}

/// One result set: its rows and the columns describing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub rows: Vec<Record>,
    pub columns: Vec<ColumnInfo>,
}

impl RowSet {
    pub fn new(rows: Vec<Record>, columns: Vec<ColumnInfo>) -> Self {
        Self { rows, columns }
    }
}

/// An element of a multi-result procedure response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultElement {
    RowSet(RowSet),
    Summary(ExecutionSummary),
}

/// The two shapes a CALL can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProcedureResult {
    /// Result sets and summaries in the order the server sent them
    Sets(Vec<ResultElement>),
    /// The procedure ran DML only and produced a single summary
    Summary(ExecutionSummary),
}

/// Creates pools for validated endpoints.
pub trait Driver: Send + Sync + 'static {
    type Pool: DriverPool;

    /// Build a pool for one (endpoint, user) pair.
    ///
    /// Must not perform network I/O; physical connections are opened on
    /// first lease.
    fn create_pool(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        settings: &PoolSettings,
    ) -> GatewayResult<Self::Pool>;
}

/// A bounded set of physical connections to one endpoint.
pub trait DriverPool: Send + Sync + 'static {
    type Conn: DriverConnection;

    /// Check out a connection, waiting at most the configured budget.
    fn lease(&self) -> impl Future<Output = GatewayResult<Self::Conn>> + Send;

    /// Close the pool and every idle connection it holds.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// A checked-out physical connection.
///
/// Statements run with empty `params` go over the text protocol; anything
/// with parameters is prepared and bound.
pub trait DriverConnection: Send + 'static {
    /// Liveness probe.
    fn ping(&mut self) -> impl Future<Output = GatewayResult<()>> + Send;

    fn set_autocommit(&mut self, enabled: bool)
    -> impl Future<Output = GatewayResult<()>> + Send;

    /// Run a statement that returns rows.
    fn query(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = GatewayResult<RowSet>> + Send;

    /// Run a statement that returns no rows.
    fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = GatewayResult<ExecutionSummary>> + Send;

    /// Run a CALL and return every result the server sent back.
    fn call(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = GatewayResult<RawProcedureResult>> + Send;

    fn commit(&mut self) -> impl Future<Output = GatewayResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Whether a timeout or lost connection left this connection unusable.
    ///
    /// A broken connection gets no further statements; releasing it
    /// discards it and the server rolls back the open transaction.
    fn is_broken(&self) -> bool {
        false
    }

    /// Return the connection to its pool, restoring session state first.
    ///
    /// A connection whose state cannot be restored is discarded and the
    /// failure reported as a `Release` error.
    fn release(self) -> impl Future<Output = GatewayResult<()>> + Send;
}
