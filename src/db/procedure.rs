//! Stored-procedure execution and result normalization.
//!
//! A CALL can answer with any mix of result sets and OK summaries. One rule
//! classifies all of them:
//! - rows and fields come from the first element, and only if it is a row set
//! - the summary is the last summary element (scanning backward from the end)
//! - a bare summary means the procedure ran DML only
//!
//! Later row sets are ignored. A commit is always issued after the call,
//! since a procedure may write whether or not it also returns rows.

use crate::db::acquirer::LeasedConnection;
use crate::db::driver::{DriverConnection, RawProcedureResult, ResultElement};
use crate::db::types::TypeCatalog;
use crate::error::GatewayResult;
use crate::models::{NormalizedResult, QueryParam, QueryRequest};
use std::time::Instant;
use tracing::debug;

/// Collapse a raw procedure result into the uniform result shape.
pub fn normalize(raw: RawProcedureResult) -> NormalizedResult {
    match raw {
        RawProcedureResult::Summary(summary) => NormalizedResult::write(summary),
        RawProcedureResult::Sets(elements) => {
            let summary = elements.iter().rev().find_map(|element| match element {
                ResultElement::Summary(summary) => Some(summary.clone()),
                ResultElement::RowSet(_) => None,
            });

            let (rows, fields) = match elements.into_iter().next() {
                Some(ResultElement::RowSet(set)) => {
                    let fields = TypeCatalog::describe_all(&set.columns);
                    (set.rows, fields)
                }
                _ => (Vec::new(), Vec::new()),
            };

            NormalizedResult {
                rows,
                fields,
                summary,
            }
        }
    }
}

/// Runs CALL statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcedureExecutor;

impl ProcedureExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute a CALL with bound parameters, normalize, then commit.
    pub async fn execute_procedure<C: DriverConnection>(
        &self,
        lease: &mut LeasedConnection<C>,
        request: &QueryRequest,
    ) -> GatewayResult<NormalizedResult> {
        self.run(lease, &request.sql, &request.params).await
    }

    /// Execute a CALL verbatim without parameter binding.
    pub async fn execute_raw_procedure<C: DriverConnection>(
        &self,
        lease: &mut LeasedConnection<C>,
        sql: &str,
    ) -> GatewayResult<NormalizedResult> {
        self.run(lease, sql, &[]).await
    }

    async fn run<C: DriverConnection>(
        &self,
        lease: &mut LeasedConnection<C>,
        sql: &str,
        params: &[QueryParam],
    ) -> GatewayResult<NormalizedResult> {
        let start = Instant::now();
        debug!(sql = %sql, params = params.len(), "Executing procedure");

        let raw = lease.call(sql, params).await?;
        let result = normalize(raw);
        lease.commit().await?;

        debug!(
            rows = result.row_count(),
            has_summary = result.summary.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Procedure committed"
        );
        Ok(result)
    }
}
