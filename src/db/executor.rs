//! Statement execution engine.
//!
//! This module runs single SQL statements against a leased connection:
//! - Reads: optional row cap injected as a trailing `LIMIT`, never committed
//! - Writes: executed then committed on the same lease
//!
//! Rolling back a failed write is the caller's job; the executor never
//! releases the lease it was handed.

use crate::db::acquirer::LeasedConnection;
use crate::db::driver::DriverConnection;
use crate::db::types::TypeCatalog;
use crate::error::GatewayResult;
use crate::models::{NormalizedResult, QueryRequest};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::debug;

static SELECT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^select\b").expect("Invalid regex pattern for SELECT prefix")
});

/// `LIMIT n`, `LIMIT n, m` or `LIMIT n OFFSET m` at the very end of a
/// statement, where any count may be a `?` placeholder.
static TRAILING_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\blimit\s+(\d+|\?)(\s*,\s*(\d+|\?))?(\s+offset\s+(\d+|\?))?\s*$")
        .expect("Invalid regex pattern for trailing LIMIT")
});

/// Cap the number of rows a SELECT may return.
///
/// Statements that do not begin with `SELECT` (after trimming) are returned
/// unchanged, as are SELECTs that already end in a `LIMIT` clause. Otherwise
/// trailing `;` terminators are stripped and ` LIMIT <cap>` appended. Applying the
/// function to its own output is a no-op.
pub fn apply_row_limit(sql: &str, cap: Option<u64>) -> String {
    let Some(cap) = cap.filter(|&n| n > 0) else {
        return sql.to_string();
    };

    let body = sql.trim();
    if !SELECT_PREFIX.is_match(body) {
        return sql.to_string();
    }

    let body = body.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if TRAILING_LIMIT.is_match(body) {
        return sql.to_string();
    }

    format!("{} LIMIT {}", body, cap)
}

/// Runs ad-hoc reads and writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute a read statement. The summary of the result is always absent.
    pub async fn execute_select<C: DriverConnection>(
        &self,
        lease: &mut LeasedConnection<C>,
        request: &QueryRequest,
    ) -> GatewayResult<NormalizedResult> {
        let start = Instant::now();
        let sql = apply_row_limit(&request.sql, request.row_cap());

        debug!(
            sql = %sql,
            params = request.params.len(),
            limit = ?request.row_cap(),
            "Executing select"
        );

        let set = lease.query(&sql, &request.params).await?;
        let fields = TypeCatalog::describe_all(&set.columns);

        debug!(
            rows = set.rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Select complete"
        );
        Ok(NormalizedResult::read(set.rows, fields))
    }

    /// Execute a write statement (INSERT, UPDATE, DELETE) and commit it.
    pub async fn execute_write<C: DriverConnection>(
        &self,
        lease: &mut LeasedConnection<C>,
        request: &QueryRequest,
    ) -> GatewayResult<NormalizedResult> {
        let start = Instant::now();

        debug!(
            sql = %request.sql,
            params = request.params.len(),
            "Executing write operation"
        );

        let summary = lease.execute(&request.sql, &request.params).await?;
        lease.commit().await?;

        debug!(
            affected_rows = summary.affected_rows,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Write committed"
        );
        Ok(NormalizedResult::write(summary))
    }
}
