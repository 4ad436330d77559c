//! Scripted in-memory driver shared by the integration tests.
//!
//! Counts every pool, lease and transaction call, and lets a test queue
//! failures for the next ping, lease or statement.

#![allow(dead_code)]

use sql_gateway::config::PoolSettings;
use sql_gateway::db::{
    Driver, DriverConnection, DriverPool, PoolRegistry, RawProcedureResult, RowSet,
};
use sql_gateway::error::{GatewayError, GatewayResult, TransientKind};
use sql_gateway::models::{Credentials, Endpoint, ExecutionSummary, QueryParam};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const ENDPOINT: &str = "mysql://db.test:3306/shop";

pub fn credentials(user: &str) -> Credentials {
    Credentials::new(ENDPOINT, user, "secret")
}

pub fn reset_error() -> GatewayError {
    GatewayError::transient(TransientKind::ConnectionReset, "read ECONNRESET")
}

/// A statement the mock connection saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// Shared state behind every pool and connection a [`MockDriver`] hands out.
#[derive(Default)]
pub struct MockState {
    pools_created: AtomicUsize,
    pools_closed: AtomicUsize,
    leases: AtomicUsize,
    releases: AtomicUsize,
    pings: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,

    lease_failures: Mutex<VecDeque<GatewayError>>,
    ping_failures: Mutex<VecDeque<GatewayError>>,
    statement_failures: Mutex<VecDeque<GatewayError>>,
    release_fails: AtomicBool,
    rollback_fails: AtomicBool,
    stalled_ping: Mutex<Option<(usize, Arc<Notify>)>>,

    query_result: Mutex<RowSet>,
    execute_result: Mutex<ExecutionSummary>,
    call_result: Mutex<Option<RawProcedureResult>>,

    statements: Mutex<Vec<Recorded>>,
    autocommit: Mutex<Vec<bool>>,
    last_settings: Mutex<Option<PoolSettings>>,
}

impl MockState {
    pub fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::SeqCst)
    }

    pub fn pools_closed(&self) -> usize {
        self.pools_closed.load(Ordering::SeqCst)
    }

    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn fail_next_lease(&self, err: GatewayError) {
        self.lease_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_ping(&self, err: GatewayError) {
        self.ping_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_statement(&self, err: GatewayError) {
        self.statement_failures.lock().unwrap().push_back(err);
    }

    /// Hold the next ping on a connection from pool `pool_id` until the
    /// returned gate is notified, then fail it with a reset.
    pub fn stall_next_ping_on_pool(&self, pool_id: usize) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.stalled_ping.lock().unwrap() = Some((pool_id, Arc::clone(&gate)));
        gate
    }

    pub fn set_release_fails(&self, fails: bool) {
        self.release_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_rollback_fails(&self, fails: bool) {
        self.rollback_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_query_result(&self, set: RowSet) {
        *self.query_result.lock().unwrap() = set;
    }

    pub fn set_execute_result(&self, summary: ExecutionSummary) {
        *self.execute_result.lock().unwrap() = summary;
    }

    pub fn set_call_result(&self, raw: RawProcedureResult) {
        *self.call_result.lock().unwrap() = Some(raw);
    }

    pub fn statements(&self) -> Vec<Recorded> {
        self.statements.lock().unwrap().clone()
    }

    pub fn last_statement(&self) -> Option<Recorded> {
        self.statements.lock().unwrap().last().cloned()
    }

    pub fn autocommit_calls(&self) -> Vec<bool> {
        self.autocommit.lock().unwrap().clone()
    }

    pub fn last_settings(&self) -> Option<PoolSettings> {
        self.last_settings.lock().unwrap().clone()
    }

    fn next_failure(queue: &Mutex<VecDeque<GatewayError>>) -> GatewayResult<()> {
        match queue.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&self, sql: &str, params: &[QueryParam]) {
        self.statements.lock().unwrap().push(Recorded {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

#[derive(Clone, Default)]
pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for MockDriver {
    type Pool = MockPool;

    fn create_pool(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
        settings: &PoolSettings,
    ) -> GatewayResult<MockPool> {
        let id = self.state.pools_created.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.last_settings.lock().unwrap() = Some(settings.clone());
        Ok(MockPool {
            id,
            endpoint: endpoint.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockPool {
    pub id: usize,
    pub endpoint: Endpoint,
    state: Arc<MockState>,
}

impl DriverPool for MockPool {
    type Conn = MockConnection;

    async fn lease(&self) -> GatewayResult<MockConnection> {
        MockState::next_failure(&self.state.lease_failures)?;
        self.state.leases.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            pool_id: self.id,
            state: Arc::clone(&self.state),
            broken: false,
        })
    }

    async fn close(&self) {
        self.state.pools_closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnection {
    pub pool_id: usize,
    state: Arc<MockState>,
    broken: bool,
}

impl MockConnection {
    /// Pop the next scripted statement failure; transient ones break the
    /// connection the way a timeout does on a real one.
    fn statement_outcome(&mut self) -> GatewayResult<()> {
        let outcome = MockState::next_failure(&self.state.statement_failures);
        if let Err(err) = &outcome {
            if err.is_transient() {
                self.broken = true;
            }
        }
        outcome
    }
}

impl DriverConnection for MockConnection {
    async fn ping(&mut self) -> GatewayResult<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        let stalled = {
            let mut slot = self.state.stalled_ping.lock().unwrap();
            match slot.take() {
                Some((pool_id, gate)) if pool_id == self.pool_id => Some(gate),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(gate) = stalled {
            gate.notified().await;
            return Err(reset_error());
        }
        MockState::next_failure(&self.state.ping_failures)
    }

    async fn set_autocommit(&mut self, enabled: bool) -> GatewayResult<()> {
        self.state.autocommit.lock().unwrap().push(enabled);
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> GatewayResult<RowSet> {
        self.state.record(sql, params);
        self.statement_outcome()?;
        Ok(self.state.query_result.lock().unwrap().clone())
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> GatewayResult<ExecutionSummary> {
        self.state.record(sql, params);
        self.statement_outcome()?;
        Ok(self.state.execute_result.lock().unwrap().clone())
    }

    async fn call(&mut self, sql: &str, params: &[QueryParam]) -> GatewayResult<RawProcedureResult> {
        self.state.record(sql, params);
        self.statement_outcome()?;
        let scripted = self.state.call_result.lock().unwrap().clone();
        Ok(scripted.unwrap_or_else(|| RawProcedureResult::Summary(ExecutionSummary::default())))
    }

    async fn commit(&mut self) -> GatewayResult<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.state.rollback_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::query("rollback refused", None));
        }
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn release(self) -> GatewayResult<()> {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        if self.state.release_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::release("could not restore autocommit"));
        }
        Ok(())
    }
}

/// Registry over a fresh mock driver.
pub fn registry() -> (Arc<PoolRegistry<MockDriver>>, Arc<MockState>) {
    let driver = MockDriver::new();
    let state = Arc::clone(&driver.state);
    (PoolRegistry::new(driver, PoolSettings::default()), state)
}

/// Poll `check` until it holds, giving spawned tasks time to run.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
