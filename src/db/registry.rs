//! Connection pool registry keyed by (endpoint, user).
//!
//! The registry owns every live pool in the process. Pools are created on
//! first use and removed when a fatal connection error is reported through
//! their health callback, or when the acquirer invalidates them explicitly.
//!
//! # Concurrency Safety
//!
//! - **`OnceCell` per key**: concurrent first requests for the same key wait
//!   on a single creation, so exactly one pool is live per key
//! - **Double-checked insert**: the cell is looked up under the read lock and
//!   inserted under the write lock only after re-checking
//! - **Close outside the lock**: entries are removed under the write lock and
//!   closed after it is released
//! - **Generations**: every registered pool gets a fresh generation number; a
//!   late fatal signal from a replaced pool only evicts its own generation

use crate::config::PoolSettings;
use crate::db::driver::{Driver, DriverPool};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{Credentials, Endpoint, PoolKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Invoked with an error observed on a pool's connections.
///
/// The registry installs one per pool; it only acts on fatal errors.
pub type HealthCallback = Arc<dyn Fn(&GatewayError) + Send + Sync>;

type PoolCell<P> = Arc<OnceCell<Arc<PoolEntry<P>>>>;

/// A registered pool plus the metadata needed to retire it.
pub struct PoolEntry<P> {
    pool: P,
    key: PoolKey,
    generation: u64,
    created_at: Instant,
    on_fatal: HealthCallback,
}

impl<P> PoolEntry<P> {
    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The callback leases use to report errors back to the registry.
    pub fn health_callback(&self) -> HealthCallback {
        Arc::clone(&self.on_fatal)
    }

    /// Forward an error to the health callback if it is fatal.
    pub fn report(&self, err: &GatewayError) {
        if err.is_fatal() {
            (self.on_fatal)(err);
        }
    }
}

impl<P> std::fmt::Debug for PoolEntry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Process-wide map from pool key to live pool.
pub struct PoolRegistry<D: Driver> {
    driver: D,
    settings: PoolSettings,
    pools: RwLock<HashMap<PoolKey, PoolCell<D::Pool>>>,
    next_generation: AtomicU64,
    invalidations: AtomicU64,
}

impl<D: Driver> PoolRegistry<D> {
    pub fn new(driver: D, settings: PoolSettings) -> Arc<Self> {
        Arc::new(Self {
            driver,
            settings,
            pools: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Get the pool for these credentials, creating it on first use.
    ///
    /// The endpoint is only parsed on a miss; a malformed endpoint fails with
    /// a validation error before anything is registered.
    pub async fn get_or_create(
        self: &Arc<Self>,
        credentials: &Credentials,
    ) -> GatewayResult<Arc<PoolEntry<D::Pool>>> {
        let key = credentials.pool_key();

        {
            let pools = self.pools.read().await;
            if let Some(entry) = pools.get(&key).and_then(|cell| cell.get()) {
                return Ok(Arc::clone(entry));
            }
        }

        let endpoint = Endpoint::parse(&credentials.endpoint)?;

        let cell = {
            let pools = self.pools.read().await;
            pools.get(&key).map(Arc::clone)
        };
        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut pools = self.pools.write().await;
                // Double-check after acquiring write lock
                Arc::clone(
                    pools
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(OnceCell::new())),
                )
            }
        };

        let entry = cell
            .get_or_try_init(|| async { self.create_entry(key.clone(), &endpoint, credentials) })
            .await?;

        Ok(Arc::clone(entry))
    }

    fn create_entry(
        self: &Arc<Self>,
        key: PoolKey,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> GatewayResult<Arc<PoolEntry<D::Pool>>> {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let pool = self
            .driver
            .create_pool(endpoint, credentials, &self.settings)?;

        info!(
            endpoint = %endpoint,
            user = %key.user(),
            generation,
            max_connections = self.settings.max_connections,
            "Created connection pool"
        );

        Ok(Arc::new(PoolEntry {
            pool,
            on_fatal: self.fatal_observer(key.clone(), generation),
            key,
            generation,
            created_at: Instant::now(),
        }))
    }

    /// Build the health callback for one pool generation.
    ///
    /// Holds only a weak reference so a pool never keeps the registry alive.
    fn fatal_observer(self: &Arc<Self>, key: PoolKey, generation: u64) -> HealthCallback {
        let registry: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |err: &GatewayError| {
            if !err.is_fatal() {
                return;
            }
            let Some(registry) = registry.upgrade() else {
                return;
            };
            warn!(
                endpoint = %key.endpoint(),
                user = %key.user(),
                generation,
                error = %err,
                "Fatal connection error, retiring pool"
            );
            let key = key.clone();
            tokio::spawn(async move {
                registry.invalidate_generation(&key, generation).await;
            });
        })
    }

    /// Remove and close the pool for `key`.
    ///
    /// Returns `false` if no live pool was registered. Closing happens in the
    /// background so callers never wait on in-flight leases.
    pub async fn invalidate(&self, key: &PoolKey) -> bool {
        let removed = {
            let mut pools = self.pools.write().await;
            pools.remove(key)
        };

        match removed.and_then(|cell| cell.get().cloned()) {
            Some(entry) => {
                self.retire(entry);
                true
            }
            None => {
                debug!(endpoint = %key.endpoint(), user = %key.user(), "No pool to invalidate");
                false
            }
        }
    }

    /// Remove the pool for `key` only if it is still the given generation.
    pub async fn invalidate_generation(&self, key: &PoolKey, generation: u64) -> bool {
        let removed = {
            let mut pools = self.pools.write().await;
            let current = pools
                .get(key)
                .and_then(|cell| cell.get())
                .map(|entry| entry.generation);
            if current == Some(generation) {
                pools.remove(key)
            } else {
                None
            }
        };

        match removed.and_then(|cell| cell.get().cloned()) {
            Some(entry) => {
                self.retire(entry);
                true
            }
            None => {
                debug!(
                    endpoint = %key.endpoint(),
                    generation,
                    "Pool generation already replaced"
                );
                false
            }
        }
    }

    fn retire(&self, entry: Arc<PoolEntry<D::Pool>>) {
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        info!(
            endpoint = %entry.key.endpoint(),
            user = %entry.key.user(),
            generation = entry.generation,
            age_secs = entry.created_at.elapsed().as_secs(),
            "Invalidated connection pool"
        );
        tokio::spawn(async move {
            entry.pool.close().await;
        });
    }

    /// Number of live pools.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Number of pools retired since the registry was created.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Acquire)
    }

    /// Close every pool. Used on shutdown.
    pub async fn close_all(&self) {
        // Drain pools under lock, close outside lock
        let drained: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        for (key, cell) in drained {
            if let Some(entry) = cell.get() {
                info!(endpoint = %key.endpoint(), user = %key.user(), "Closing connection pool");
                entry.pool.close().await;
            }
        }
    }
}

impl<D: Driver> std::fmt::Debug for PoolRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("settings", &self.settings)
            .field("invalidations", &self.invalidation_count())
            .finish_non_exhaustive()
    }
}
