//! Bulk cache refresh from the durable store.
//!
//! Used on cold start or after an outage. Every refreshable table of a
//! customer is scanned in full and each record is written blindly under its
//! entity key and its beID key. There is no read-before-write, so live
//! writers racing with a refresh may see their entries overwritten with the
//! scanned version until the next invalidation.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use strata_types::{Entity, EntityType};

use crate::adapter::{DurableStore, VolatileCache, ensure_ready, table_name};
use crate::error::CacheResult;
use crate::keys;

/// What a refresh wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Records read from the durable store.
    pub records: usize,
    /// Cache keys written.
    pub keys_written: usize,
}

/// Repopulates the cache for whole customers.
#[derive(Clone)]
pub struct BulkRefresh {
    cache: Arc<dyn VolatileCache>,
    store: Arc<dyn DurableStore>,
}

impl BulkRefresh {
    /// Create a refresher over the given adapters.
    pub const fn new(cache: Arc<dyn VolatileCache>, store: Arc<dyn DurableStore>) -> Self {
        Self { cache, store }
    }

    /// Reload every entity of `customer` into the cache.
    ///
    /// A customer without records completes with an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready, [`CacheError::InvalidIdentifier`](crate::CacheError::InvalidIdentifier)
    /// for an invalid customer id, or the first durable or cache failure.
    pub async fn refresh(&self, customer: &str) -> CacheResult<RefreshReport> {
        ensure_ready(self.cache.as_ref(), "refresh", customer)?;

        let scans = try_join_all(
            EntityType::REFRESHABLE
                .into_iter()
                .map(|entity_type| self.scan_table(customer, entity_type)),
        )
        .await?;
        let entities: Vec<Entity> = scans.into_iter().flatten().collect();

        let written = try_join_all(entities.iter().map(|entity| self.write(customer, entity))).await?;
        let report = RefreshReport {
            records: entities.len(),
            keys_written: written.into_iter().sum(),
        };
        tracing::info!(
            customer,
            records = report.records,
            keys_written = report.keys_written,
            "Cache refreshed"
        );
        Ok(report)
    }

    async fn scan_table(&self, customer: &str, entity_type: EntityType) -> CacheResult<Vec<Entity>> {
        let table = table_name(customer, entity_type)?;
        let mut rows = self
            .store
            .scan(&table)
            .await
            .inspect_err(|e| tracing::error!(table, error = %e, "Refresh scan failed"))?;
        for row in &mut rows {
            row.tag(entity_type, customer);
        }
        Ok(rows)
    }

    /// Write one tagged entity, returning the number of keys written.
    async fn write(&self, customer: &str, entity: &Entity) -> CacheResult<usize> {
        let Some(entity_type) = entity.entity_type else {
            return Ok(0);
        };
        let payload = serde_json::to_string(entity)?;
        let key = keys::entity(customer, &entity.id, entity_type);
        tracing::debug!(key, "Refresh write");
        self.cache
            .set(&key, &payload)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Refresh write failed"))?;
        match &entity.be_id {
            Some(be_id) => {
                let be_key = keys::be_id(be_id);
                self.cache
                    .set(&be_key, &payload)
                    .await
                    .inspect_err(|e| {
                        tracing::error!(key = %be_key, error = %e, "Refresh write failed");
                    })?;
                Ok(2)
            }
            None => Ok(1),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::CacheError;
    use crate::memory::{MemoryCache, MemoryStore};

    #[tokio::test]
    async fn refresh_writes_both_keys_tagged() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        store
            .insert("C1", Entity::new("U1", EntityType::USER).with_be_id("B1"))
            .await
            .unwrap();
        store
            .insert("C1", Entity::new("D1", EntityType::DEVICE))
            .await
            .unwrap();
        store
            .insert("C2", Entity::new("U9", EntityType::USER).with_be_id("B9"))
            .await
            .unwrap();

        let refresher = BulkRefresh::new(cache.clone(), store);
        let report = refresher.refresh("C1").await.unwrap();
        assert_eq!(report, RefreshReport { records: 2, keys_written: 3 });

        let cached: Value = serde_json::from_str(&cache.get("B1").await.unwrap().unwrap()).unwrap();
        assert_eq!(cached["ID_CUSTOMER"], "C1");
        assert_eq!(cached["TYPE"], 1);
        assert!(cache.get("C1.D1.3").await.unwrap().is_some());
        assert!(cache.get("B9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_of_empty_customer_is_ok() {
        let cache = Arc::new(MemoryCache::new());
        let refresher = BulkRefresh::new(cache.clone(), Arc::new(MemoryStore::new()));
        assert_eq!(refresher.refresh("C1").await.unwrap(), RefreshReport::default());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn refresh_needs_ready_cache() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_ready(false);
        let refresher = BulkRefresh::new(cache, Arc::new(MemoryStore::new()));
        assert!(matches!(
            refresher.refresh("C1").await,
            Err(CacheError::Unavailable { .. })
        ));
    }
}
