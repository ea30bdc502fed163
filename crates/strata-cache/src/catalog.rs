//! Key-pattern enumeration over cached entities.
//!
//! The durable store has no secondary index that could answer these
//! queries, so they need the volatile cache and fail with
//! [`CacheError::Unavailable`](crate::CacheError::Unavailable) when it is
//! not ready.

use std::sync::Arc;

use strata_types::{EntityRef, EntityType};

use crate::adapter::{VolatileCache, ensure_ready};
use crate::error::CacheResult;
use crate::keys;

/// Pattern queries over entity keys.
#[derive(Clone)]
pub struct KeyCatalog {
    cache: Arc<dyn VolatileCache>,
}

impl KeyCatalog {
    /// Create a catalog over the given cache.
    pub const fn new(cache: Arc<dyn VolatileCache>) -> Self {
        Self { cache }
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        ensure_ready(self.cache.as_ref(), "scan", pattern)?;
        self.cache
            .keys_matching(pattern)
            .await
            .inspect_err(|e| tracing::error!(pattern, error = %e, "Key scan failed"))
    }

    /// Ids of `entity_type` entities whose id starts with `search`, with the
    /// `search` prefix removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn keys_with_prefix(
        &self,
        customer: &str,
        search: &str,
        entity_type: EntityType,
    ) -> CacheResult<Vec<String>> {
        let prefix = format!("{customer}.{search}");
        let suffix = format!(".{entity_type}");
        let found = self.scan(&format!("{prefix}*{suffix}")).await?;
        Ok(found
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.strip_suffix(&suffix))
            .map(str::to_owned)
            .collect())
    }

    /// Full entity keys of `entity_type` whose id equals `search`, ignoring
    /// ASCII case.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn case_insensitive_keys(
        &self,
        customer: &str,
        search: &str,
        entity_type: EntityType,
    ) -> CacheResult<Vec<String>> {
        let pattern = keys::entity_pattern(
            customer,
            &keys::ignore_case_pattern(search),
            &entity_type.to_string(),
        );
        self.scan(&pattern).await
    }

    /// Entities of any type whose id contains `search`, ignoring ASCII case.
    ///
    /// Only plain `{customer}.{id}.{type}` keys are reported.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn entities_from_unknown_type(
        &self,
        customer: &str,
        search: &str,
    ) -> CacheResult<Vec<EntityRef>> {
        let pattern = format!("{customer}.*{}*", keys::ignore_case_pattern(search));
        let found = self.scan(&pattern).await?;
        Ok(found
            .iter()
            .filter_map(|key| {
                let mut parts = key.split('.');
                let (_, id, raw_type) = (parts.next()?, parts.next()?, parts.next()?);
                if parts.next().is_some() {
                    return None;
                }
                Some(EntityRef::new(id, raw_type.parse().ok()?))
            })
            .collect())
    }

    /// Number of cached `entity_type` entities of a customer.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn count_by_type(&self, customer: &str, entity_type: EntityType) -> CacheResult<usize> {
        self.count_by_type_and_prefix(customer, "", entity_type)
            .await
    }

    /// Number of cached `entity_type` entities whose id starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn count_by_type_and_prefix(
        &self,
        customer: &str,
        prefix: &str,
        entity_type: EntityType,
    ) -> CacheResult<usize> {
        let found = self
            .scan(&format!("{customer}.{prefix}*.{entity_type}"))
            .await?;
        Ok(found.len())
    }

    /// Number of cached entities of a customer across every refreshable type.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`](crate::CacheError::Unavailable) if
    /// the cache is not ready.
    pub async fn entity_count(&self, customer: &str) -> CacheResult<usize> {
        let mut total: usize = 0;
        for entity_type in EntityType::REFRESHABLE {
            total = total.saturating_add(self.count_by_type(customer, entity_type).await?);
        }
        Ok(total)
    }
}
