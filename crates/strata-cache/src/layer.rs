//! The assembled cache layer.
//!
//! [`CacheLayer`] owns one volatile cache and one durable store and hands
//! out the components that operate on them. All components share the same
//! adapters, so they observe the same readiness state.

use std::sync::Arc;

use crate::accounts::Accounts;
use crate::adapter::{DurableStore, VolatileCache};
use crate::catalog::KeyCatalog;
use crate::config::StrataConfig;
use crate::design_lock::DesignLocks;
use crate::dragonfly::DragonflyPool;
use crate::entity_cache::EntityCache;
use crate::error::CacheResult;
use crate::ordered::OrderedStore;
use crate::postgres::PostgresPool;
use crate::refresh::BulkRefresh;
use crate::relations::RelationResolver;

/// Entry point to every cache operation.
#[derive(Clone)]
pub struct CacheLayer {
    cache: Arc<dyn VolatileCache>,
    postgres: Option<PostgresPool>,
    ordered: OrderedStore,
    catalog: KeyCatalog,
    locks: DesignLocks,
    refresher: BulkRefresh,
    accounts: Accounts,
}

impl CacheLayer {
    /// Assemble a layer over arbitrary adapters.
    pub fn new(cache: Arc<dyn VolatileCache>, store: Arc<dyn DurableStore>) -> Self {
        let ordered = OrderedStore::new(Arc::clone(&cache), Arc::clone(&store));
        Self {
            catalog: KeyCatalog::new(Arc::clone(&cache)),
            locks: DesignLocks::new(Arc::clone(&cache)),
            refresher: BulkRefresh::new(Arc::clone(&cache), Arc::clone(&store)),
            accounts: Accounts::new(ordered.entities.clone(), store),
            ordered,
            postgres: None,
            cache,
        }
    }

    /// Connect to `Dragonfly` and `PostgreSQL` as configured.
    ///
    /// Pending migrations run first when `durable.run_migrations` is set.
    ///
    /// # Errors
    ///
    /// Returns the first connection or migration failure.
    pub async fn connect(config: &StrataConfig) -> CacheResult<Self> {
        let dragonfly = DragonflyPool::connect(&config.cache.url, config.environment).await?;
        let postgres = PostgresPool::connect(&config.durable).await?;
        if config.durable.run_migrations {
            postgres.run_migrations().await?;
        }
        let mut layer = Self::new(Arc::new(dragonfly), Arc::new(postgres.clone()));
        layer.postgres = Some(postgres);
        tracing::info!(
            environment = config.environment.as_str(),
            "Cache layer connected"
        );
        Ok(layer)
    }

    /// Whether the volatile cache is serving commands.
    pub fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }

    /// Remove every cached key. Refused in production.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::FlushForbidden`](crate::CacheError::FlushForbidden)
    /// in production, or the underlying cache failure.
    pub async fn flush(&self) -> CacheResult<()> {
        self.cache
            .flush()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Cache flush refused or failed"))
    }

    /// Close the cache connection and the durable pool, if this layer owns one.
    ///
    /// # Errors
    ///
    /// Returns the cache failure; the durable pool is closed regardless.
    pub async fn close(&self) -> CacheResult<()> {
        let closed = self.cache.close().await;
        if let Some(postgres) = &self.postgres {
            postgres.close().await;
        }
        tracing::info!("Cache layer closed");
        closed
    }

    /// Entity lookups and invalidation.
    pub const fn entities(&self) -> &EntityCache {
        &self.ordered.entities
    }

    /// Monotonic timestamped records and alarm bookkeeping.
    pub const fn ordered(&self) -> &OrderedStore {
        &self.ordered
    }

    /// Key-pattern queries.
    pub const fn catalog(&self) -> &KeyCatalog {
        &self.catalog
    }

    /// Relation traversal. Built on demand since it only bundles handles.
    pub fn relations(&self) -> RelationResolver {
        RelationResolver::new(self.ordered.entities.clone(), self.catalog.clone())
    }

    /// Solution design locks.
    pub const fn locks(&self) -> &DesignLocks {
        &self.locks
    }

    /// Bulk refresh from the durable store.
    pub const fn refresher(&self) -> &BulkRefresh {
        &self.refresher
    }

    /// User account upkeep.
    pub const fn accounts(&self) -> &Accounts {
        &self.accounts
    }
}
