//! sqlx-backed MySQL driver.
//!
//! Pools are created lazily (no I/O until the first lease) with one pool per
//! (endpoint, user). Every statement runs under the query timeout; a timeout
//! or lost connection marks the connection broken so it is discarded rather
//! than returned to the pool on release.
//!
//! sqlx does not expose the server status flags or the NOT NULL column flag,
//! so summaries carry no `serverStatus` and columns report as nullable.

use crate::config::PoolSettings;
use crate::db::driver::{
    ColumnInfo, Driver, DriverConnection, DriverPool, RawProcedureResult, ResultElement, RowSet,
};
use crate::db::types::{column_info, row_to_record};
use crate::error::{GatewayError, GatewayResult, TransientKind};
use crate::models::{Credentials, Endpoint, ExecutionSummary, QueryParam, Record};
use futures_util::TryStreamExt;
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlPoolOptions, MySqlQueryResult,
    MySqlRow,
};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Either, Executor, MySql, MySqlPool, Row};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Creates sqlx MySQL pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for MySqlDriver {
    type Pool = MySqlDriverPool;

    fn create_pool(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        settings: &PoolSettings,
    ) -> GatewayResult<MySqlDriverPool> {
        settings.validate().map_err(GatewayError::validation)?;

        let options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .database(&endpoint.database)
            .username(&credentials.user)
            .password(&credentials.password)
            .charset("utf8mb4");

        // The lease budget is enforced here; sqlx's own acquire timeout only
        // has to outlast it
        let pool = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout.max(settings.connect_timeout))
            .idle_timeout(Some(settings.idle_timeout))
            .test_before_acquire(false)
            .connect_lazy_with(options);

        debug!(
            host = %endpoint.host,
            port = endpoint.port,
            max_connections = settings.max_connections,
            keep_alive = settings.keep_alive,
            "Created lazy MySQL pool"
        );

        Ok(MySqlDriverPool {
            pool,
            settings: settings.clone(),
        })
    }
}

/// One sqlx pool plus the budgets its leases run under.
#[derive(Debug, Clone)]
pub struct MySqlDriverPool {
    pool: MySqlPool,
    settings: PoolSettings,
}

impl MySqlDriverPool {
    /// Every connection is checked out and the pool cannot grow.
    fn is_saturated(&self) -> bool {
        self.pool.size() >= self.settings.max_connections && self.pool.num_idle() == 0
    }
}

impl DriverPool for MySqlDriverPool {
    type Conn = MySqlLease;

    async fn lease(&self) -> GatewayResult<MySqlLease> {
        // A saturated pool waits for a returned connection; otherwise the
        // wait is dominated by opening a new one
        let saturated = self.is_saturated();
        let budget = if saturated {
            self.settings.acquire_timeout
        } else {
            self.settings.connect_timeout
        };

        match timeout(budget, self.pool.acquire()).await {
            Ok(Ok(conn)) => Ok(MySqlLease {
                conn,
                query_timeout: self.settings.query_timeout,
                broken: false,
            }),
            Ok(Err(sqlx::Error::PoolTimedOut)) | Err(_) if saturated => {
                Err(GatewayError::backpressure(format!(
                    "all {} connections busy for {}s",
                    self.settings.max_connections,
                    budget.as_secs()
                )))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(GatewayError::transient(
                TransientKind::Timeout,
                format!("connect timed out after {}s", budget.as_secs()),
            )),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A pooled MySQL connection checked out for one request.
pub struct MySqlLease {
    conn: PoolConnection<MySql>,
    query_timeout: Duration,
    /// Set once the connection can no longer be trusted
    broken: bool,
}

impl MySqlLease {
    /// Note the outcome of a driver call; timeouts and lost connections
    /// leave the connection unfit for reuse.
    fn track<T>(&mut self, result: GatewayResult<T>) -> GatewayResult<T> {
        if let Err(err) = &result {
            if err.is_transient() {
                self.broken = true;
            }
        }
        result
    }
}

/// Run a driver call under the query timeout.
async fn guarded<T>(
    budget: Duration,
    operation: &str,
    call: impl Future<Output = Result<T, sqlx::Error>>,
) -> GatewayResult<T> {
    match timeout(budget, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(GatewayError::from(e)),
        Err(_) => Err(GatewayError::timeout(operation, budget.as_secs())),
    }
}

impl DriverConnection for MySqlLease {
    async fn ping(&mut self) -> GatewayResult<()> {
        let result = guarded(self.query_timeout, "ping", self.conn.ping()).await;
        self.track(result)
    }

    async fn set_autocommit(&mut self, enabled: bool) -> GatewayResult<()> {
        let result = guarded(
            self.query_timeout,
            "set autocommit",
            run_text(&mut self.conn, autocommit_statement(enabled)),
        )
        .await;
        self.track(result)
    }

    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> GatewayResult<RowSet> {
        let result = guarded(
            self.query_timeout,
            "query execution",
            query_rows(&mut self.conn, sql, params),
        )
        .await;
        self.track(result)
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> GatewayResult<ExecutionSummary> {
        let result = guarded(
            self.query_timeout,
            "write operation",
            execute_statement(&mut self.conn, sql, params),
        )
        .await;
        self.track(result)
    }

    async fn call(&mut self, sql: &str, params: &[QueryParam]) -> GatewayResult<RawProcedureResult> {
        let result = guarded(
            self.query_timeout,
            "procedure call",
            call_procedure(&mut self.conn, sql, params),
        )
        .await;
        self.track(result)
    }

    async fn commit(&mut self) -> GatewayResult<()> {
        let result = guarded(self.query_timeout, "commit", run_text(&mut self.conn, "COMMIT")).await;
        self.track(result)
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        // A timed-out statement may still be streaming its result
        if self.broken {
            return Ok(());
        }
        let result =
            guarded(self.query_timeout, "rollback", run_text(&mut self.conn, "ROLLBACK")).await;
        self.track(result)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn release(mut self) -> GatewayResult<()> {
        if self.broken {
            debug!("Discarding broken connection");
            discard(self.conn).await;
            return Ok(());
        }

        let restore = timeout(
            self.query_timeout,
            run_text(&mut self.conn, autocommit_statement(true)),
        )
        .await;

        let reason = match restore {
            // Dropping the PoolConnection returns it to the pool
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "restoring autocommit timed out after {}s",
                self.query_timeout.as_secs()
            ),
        };

        discard(self.conn).await;
        Err(GatewayError::release(reason))
    }
}

fn autocommit_statement(enabled: bool) -> &'static str {
    if enabled {
        "SET autocommit = 1"
    } else {
        "SET autocommit = 0"
    }
}

/// Take a connection out of its pool and close it.
async fn discard(conn: PoolConnection<MySql>) {
    if let Err(e) = conn.detach().close().await {
        warn!(error = %e, "Failed to close discarded connection");
    }
}

/// Run a parameterless statement over the text protocol.
async fn run_text(conn: &mut MySqlConnection, sql: &str) -> Result<(), sqlx::Error> {
    conn.execute(sql).await.map(|_| ())
}

async fn query_rows(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
) -> Result<RowSet, sqlx::Error> {
    let rows = fetch_rows(&mut *conn, sql, params).await?;
    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(column_info).collect(),
        None => describe_columns(conn, sql).await,
    };
    let rows: Vec<Record> = rows.iter().map(row_to_record).collect();
    Ok(RowSet::new(rows, columns))
}

async fn execute_statement(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
) -> Result<ExecutionSummary, sqlx::Error> {
    // When params is empty, execute raw SQL directly to avoid prepared statement issues
    // (some SQL like CREATE PROCEDURE doesn't support prepared statements)
    let done = if params.is_empty() {
        conn.execute(sql).await?
    } else {
        bind_params(sqlx::query(sql), params).execute(conn).await?
    };
    Ok(summarize(&done))
}

async fn call_procedure(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
) -> Result<RawProcedureResult, sqlx::Error> {
    let items: Vec<Either<MySqlQueryResult, MySqlRow>> = if params.is_empty() {
        conn.fetch_many(sql).try_collect().await?
    } else {
        conn.fetch_many(bind_params(sqlx::query(sql), params))
            .try_collect()
            .await?
    };
    Ok(group_results(items))
}

async fn fetch_rows(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
) -> Result<Vec<MySqlRow>, sqlx::Error> {
    // When params is empty, use raw SQL to avoid prepared statement issues
    if params.is_empty() {
        conn.fetch_all(sql).await
    } else {
        bind_params(sqlx::query(sql), params).fetch_all(conn).await
    }
}

/// Column metadata for a statement that returned no rows.
///
/// Describing the statement also recovers each column's NOT NULL flag.
async fn describe_columns(conn: &mut MySqlConnection, sql: &str) -> Vec<ColumnInfo> {
    match conn.describe(sql).await {
        Ok(described) => described
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| ColumnInfo {
                nullable: described.nullable(idx).unwrap_or(true),
                ..column_info(column)
            })
            .collect(),
        Err(e) => {
            debug!(error = %e, "Could not describe empty result set");
            Vec::new()
        }
    }
}

fn summarize(done: &MySqlQueryResult) -> ExecutionSummary {
    ExecutionSummary::new(done.rows_affected(), done.last_insert_id())
}

/// Split the flat stream sqlx returns for a CALL back into result sets.
///
/// Rows accumulate into a set until the OK packet that terminates it; an OK
/// packet with no rows before it is a summary of its own. A lone summary is
/// the DML-only shape.
fn group_results(items: Vec<Either<MySqlQueryResult, MySqlRow>>) -> RawProcedureResult {
    let mut elements = Vec::new();
    let mut current: Option<RowSet> = None;

    for item in items {
        match item {
            Either::Right(row) => {
                let set = current.get_or_insert_with(|| {
                    RowSet::new(Vec::new(), row.columns().iter().map(column_info).collect())
                });
                set.rows.push(row_to_record(&row));
            }
            Either::Left(done) => match current.take() {
                Some(set) => elements.push(ResultElement::RowSet(set)),
                None => elements.push(ResultElement::Summary(summarize(&done))),
            },
        }
    }
    if let Some(set) = current.take() {
        elements.push(ResultElement::RowSet(set));
    }

    match elements.as_slice() {
        [ResultElement::Summary(summary)] => RawProcedureResult::Summary(summary.clone()),
        _ => RawProcedureResult::Sets(elements),
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    params: &'q [QueryParam],
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = bind_param(query, param);
    }
    query
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}
