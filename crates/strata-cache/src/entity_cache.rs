//! Cache-aside entity lookups.
//!
//! Entities live in the volatile cache under two keys: the customer-scoped
//! `{customer}.{id}.{type}` key and the bare `{beID}` key. Lookups fill the
//! cache from the durable store on a miss. Writers that change an entity do
//! not rewrite the cache; they invalidate it with [`EntityCache::mark_stale`],
//! which stores [`RELOAD_MARKER`] and forces the next reader to reload.
//!
//! # Reload protocol
//!
//! Each lookup runs a small state machine over one key:
//!
//! ```text
//! Probe --(payload)--> Fresh
//!   |  --(tombstone)--> Fresh (absent)
//!   |  --(marker)----> Stale --(delete)--> Reloading
//!   '--(missing)-----------------------> Reloading --(swap)--> Fresh
//!                                            ^                   |
//!                                            '---- Stale <-------'
//!                                          (swap displaced a marker)
//! ```
//!
//! The reload swaps the durable value in with `GETSET`. If the swap displaced
//! a reload marker, a writer invalidated the entry while the reload was in
//! flight, so the freshly written value may already be outdated: the key is
//! deleted and reloaded again. Reloads repeat until a swap displaces
//! something other than a marker.
//!
//! When the volatile cache is not ready, lookups go straight to the durable
//! store and never touch the cache.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_types::{CustomerInfo, Entity, EntityType};

use crate::adapter::{DurableStore, VolatileCache, ensure_ready};
use crate::error::{CacheError, CacheResult};
use crate::keys::{self, RELOAD_MARKER, TOMBSTONE};

/// Reload protocol states for one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadState {
    /// Read the cached entry.
    Probe,
    /// A reload marker was found (or displaced); drop the key.
    Stale,
    /// Load from the durable store and swap into the cache.
    Reloading,
}

/// Entity and customer lookups with cache-aside reload.
#[derive(Clone)]
pub struct EntityCache {
    cache: Arc<dyn VolatileCache>,
    store: Arc<dyn DurableStore>,
}

impl EntityCache {
    /// Create an entity cache over the given adapters.
    pub const fn new(cache: Arc<dyn VolatileCache>, store: Arc<dyn DurableStore>) -> Self {
        Self { cache, store }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Entity by its customer-scoped key.
    ///
    /// A confirmed durable miss is cached as a tombstone, so repeated misses
    /// do not reach the durable store.
    ///
    /// # Errors
    ///
    /// Returns the durable store error when a reload fails, or the cache
    /// error when the cache is ready but a command fails.
    pub async fn get(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<Entity>> {
        let key = keys::entity(customer, id, entity_type);
        self.read_through(&key, true, move || async move {
            let mut found = self.store.entity(customer, id, entity_type).await?;
            if let Some(entity) = found.as_mut() {
                entity.tag(entity_type, customer);
            }
            Ok(found)
        })
        .await
    }

    /// Entity by its surrogate id.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn get_by_be_id(&self, be_id: &str) -> CacheResult<Option<Entity>> {
        let key = keys::be_id(be_id);
        self.read_through(&key, true, move || self.store.entity_by_be_id(be_id))
            .await
    }

    /// Customer record. Missing customers are not cached.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn get_customer(&self, customer: &str) -> CacheResult<Option<CustomerInfo>> {
        let key = keys::customer(customer);
        self.read_through(&key, false, move || self.store.customer(customer))
            .await
    }

    /// The customer's file bucket, if the customer exists and has one.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn file_bucket(&self, customer: &str) -> CacheResult<Option<String>> {
        Ok(self
            .get_customer(customer)
            .await?
            .and_then(|info| info.file_bucket().map(str::to_owned)))
    }

    async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        tombstone_on_miss: bool,
        load: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = CacheResult<Option<T>>>,
    {
        if !self.cache.is_ready() {
            tracing::debug!(key, "Cache not ready, reading from durable store");
            return load().await;
        }

        let mut state = ReloadState::Probe;
        let mut reloads: u32 = 0;
        loop {
            state = match state {
                ReloadState::Probe => match self.cache.get(key).await.inspect_err(|e| {
                    tracing::error!(key, error = %e, "Cache read failed");
                })? {
                    Some(raw) if raw == RELOAD_MARKER => ReloadState::Stale,
                    Some(raw) if raw == TOMBSTONE => return Ok(None),
                    Some(raw) => return Ok(Some(serde_json::from_str(&raw)?)),
                    None => ReloadState::Reloading,
                },
                ReloadState::Stale => {
                    self.cache.delete(key).await.inspect_err(|e| {
                        tracing::error!(key, error = %e, "Failed to drop stale entry");
                    })?;
                    ReloadState::Reloading
                }
                ReloadState::Reloading => {
                    reloads = reloads.saturating_add(1);
                    let loaded = load().await.inspect_err(|e| {
                        tracing::error!(key, error = %e, "Durable store read failed");
                    })?;
                    let payload = match &loaded {
                        Some(value) => serde_json::to_string(value)?,
                        None if tombstone_on_miss => TOMBSTONE.to_owned(),
                        None => return Ok(None),
                    };
                    let displaced = self
                        .cache
                        .get_and_replace(key, &payload)
                        .await
                        .inspect_err(|e| tracing::error!(key, error = %e, "Cache fill failed"))?;
                    if displaced.as_deref() == Some(RELOAD_MARKER) {
                        tracing::debug!(key, reloads, "Entry invalidated during reload");
                        ReloadState::Stale
                    } else {
                        tracing::debug!(key, reloads, found = loaded.is_some(), "Cache filled");
                        return Ok(loaded);
                    }
                }
            };
        }
    }

    // =========================================================================
    // Writes and invalidation
    // =========================================================================

    /// Write an entity under its entity key and, when it has one, its beID key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidIdentifier`] if the entity has no type,
    /// or [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn put(&self, customer: &str, entity: &Entity) -> CacheResult<()> {
        let entity_type = entity
            .entity_type
            .ok_or_else(|| CacheError::InvalidIdentifier(format!("untyped entity {}", entity.id)))?;
        let key = keys::entity(customer, &entity.id, entity_type);
        self.ensure_ready("set", &key)?;

        let payload = serde_json::to_string(entity)?;
        self.cache
            .set(&key, &payload)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Entity write failed"))?;
        if let Some(be_id) = &entity.be_id {
            let be_key = keys::be_id(be_id);
            self.cache
                .set(&be_key, &payload)
                .await
                .inspect_err(|e| {
                    tracing::error!(key = %be_key, error = %e, "Entity write failed");
                })?;
        }
        Ok(())
    }

    /// Invalidate an entity key; the next lookup reloads it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn mark_stale(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<()> {
        self.mark_key_stale(&keys::entity(customer, id, entity_type))
            .await
    }

    /// Invalidate a beID key; the next lookup reloads it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn mark_stale_be_id(&self, be_id: &str) -> CacheResult<()> {
        self.mark_key_stale(&keys::be_id(be_id)).await
    }

    async fn mark_key_stale(&self, key: &str) -> CacheResult<()> {
        self.ensure_ready("invalidate", key)?;
        self.cache
            .set(key, RELOAD_MARKER)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Invalidation failed"))?;
        tracing::debug!(key, "Marked stale");
        Ok(())
    }

    /// Delete a cached entity key, returning the number of keys removed.
    ///
    /// Never-cached entities yield `0`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn delete(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<u64> {
        self.delete_raw(&keys::entity(customer, id, entity_type))
            .await
    }

    /// Remove an entity key together with the beID key of the cached entity.
    ///
    /// Returns `true` when anything was removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn remove_by_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<bool> {
        let key = keys::entity(customer, id, entity_type);
        let be_id = self.cached_entity(&key).await?.and_then(|e| e.be_id);
        let mut removed = self.cache.delete(&key).await?;
        if let Some(be_id) = be_id {
            removed = removed.saturating_add(self.cache.delete(&keys::be_id(&be_id)).await?);
        }
        Ok(removed > 0)
    }

    /// Remove a beID key together with the entity key of the cached entity.
    ///
    /// Returns `true` when anything was removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn remove_by_be_id(&self, be_id: &str) -> CacheResult<bool> {
        let key = keys::be_id(be_id);
        let entity_key = self.cached_entity(&key).await?.and_then(|e| {
            let customer = e.customer.as_deref()?;
            Some(keys::entity(customer, &e.id, e.entity_type?))
        });
        let mut removed = self.cache.delete(&key).await?;
        if let Some(entity_key) = entity_key {
            removed = removed.saturating_add(self.cache.delete(&entity_key).await?);
        }
        Ok(removed > 0)
    }

    /// Remove both keys of an entity whose beID is known.
    ///
    /// Returns `true` when at least one key was removed; a partial removal
    /// (only one of the keys existed) is not distinguished from a full one.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn remove_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
        be_id: &str,
    ) -> CacheResult<bool> {
        let key = keys::entity(customer, id, entity_type);
        self.ensure_ready("delete", &key)?;
        let be_key = keys::be_id(be_id);
        let (by_be_id, by_entity) =
            futures::try_join!(self.cache.delete(&be_key), self.cache.delete(&key)).inspect_err(
                |e| tracing::error!(key = %key, be_id, error = %e, "Failed to remove entity from cache"),
            )?;
        Ok(by_be_id.saturating_add(by_entity) > 0)
    }

    async fn cached_entity(&self, key: &str) -> CacheResult<Option<Entity>> {
        self.ensure_ready("delete", key)?;
        let cached = self
            .cache
            .get(key)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Cache read failed"))?;
        Ok(match cached {
            Some(raw) if raw != TOMBSTONE && raw != RELOAD_MARKER => serde_json::from_str(&raw).ok(),
            _ => None,
        })
    }

    // =========================================================================
    // Raw keys
    // =========================================================================

    /// Store a raw value, returning the value it displaced.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn set_raw(&self, key: &str, value: &str) -> CacheResult<Option<String>> {
        self.ensure_ready("set", key)?;
        self.cache.get_and_replace(key, value).await
    }

    /// Read a raw value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_ready("get", key)?;
        self.cache.get(key).await
    }

    /// Delete a raw key, returning the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn delete_raw(&self, key: &str) -> CacheResult<u64> {
        self.ensure_ready("delete", key)?;
        self.cache.delete(key).await.inspect_err(|e| {
            tracing::error!(key, error = %e, "Cache delete failed");
        })
    }

    fn ensure_ready(&self, operation: &'static str, key: &str) -> CacheResult<()> {
        ensure_ready(self.cache.as_ref(), operation, key)
    }

    // =========================================================================
    // Attribute accessors
    // =========================================================================

    /// The entity's beID.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn be_id_of(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<String>> {
        Ok(self
            .get(customer, id, entity_type)
            .await?
            .and_then(|e| e.be_id))
    }

    /// Whether acknowledgements for the entity must be notified (`NOTIFY_ACK`).
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn must_notify(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<bool>> {
        Ok(self
            .get(customer, id, entity_type)
            .await?
            .and_then(|e| e.notify_ack()))
    }

    /// The entity's `DATA_TYPE`.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn data_type(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<String>> {
        Ok(self
            .get(customer, id, entity_type)
            .await?
            .and_then(|e| e.data_type().map(str::to_owned)))
    }

    /// `DATA_TYPE` of the entity behind a beID.
    ///
    /// Value records point at their entity through `ENTITY_NAME`; the data
    /// type is then read from that entity.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn data_type_by_be_id(&self, be_id: &str) -> CacheResult<Option<String>> {
        let Some(entity) = self.get_by_be_id(be_id).await? else {
            return Ok(None);
        };
        match (entity.entity_name(), entity.customer.as_deref()) {
            (Some(target), Some(customer)) => {
                self.data_type(customer, &target.id, target.entity_type)
                    .await
            }
            _ => Ok(entity.data_type().map(str::to_owned)),
        }
    }

    /// Whether values were ever recorded for a beID.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn has_data_by_be_id(&self, customer: &str, be_id: &str) -> CacheResult<bool> {
        Ok(self
            .get(customer, &keys::value_id(be_id), EntityType::RELATIONSHIP)
            .await?
            .is_some())
    }

    /// Whether values were ever recorded for an entity; `None` if the entity
    /// does not exist.
    ///
    /// # Errors
    ///
    /// See [`EntityCache::get`].
    pub async fn has_data_by_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<bool>> {
        match self.be_id_of(customer, id, entity_type).await? {
            Some(be_id) => self.has_data_by_be_id(customer, &be_id).await.map(Some),
            None => Ok(None),
        }
    }
}
