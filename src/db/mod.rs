//! Database abstraction layer.
//!
//! This module provides the pooling and execution kernel:
//! - Driver seam and the sqlx MySQL driver
//! - Pool registry keyed by (endpoint, user)
//! - Connection acquisition with transient-failure retry
//! - Statement and procedure execution
//! - Type mappings

pub mod acquirer;
pub mod driver;
pub mod executor;
pub mod mysql;
pub mod procedure;
pub mod registry;
pub mod types;

pub use acquirer::{ConnectionAcquirer, DriverConn, LeasedConnection, MAX_ACQUIRE_ATTEMPTS};
pub use driver::{
    ColumnInfo, Driver, DriverConnection, DriverPool, RawProcedureResult, ResultElement, RowSet,
};
pub use executor::{QueryExecutor, apply_row_limit};
pub use mysql::{MySqlDriver, MySqlDriverPool, MySqlLease};
pub use procedure::{ProcedureExecutor, normalize};
pub use registry::{HealthCallback, PoolEntry, PoolRegistry};
pub use types::TypeCatalog;
