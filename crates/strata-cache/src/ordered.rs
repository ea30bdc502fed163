//! Monotonic time-stamped values.
//!
//! The ordered-value store keeps one record per key and guarantees that,
//! once every concurrent writer has finished, the stored record carries the
//! largest timestamp ever submitted for that key. It uses no locks and no
//! multi-key transactions, only the cache's atomic `GETSET`:
//!
//! 1. Swap the candidate in.
//! 2. Nothing displaced: first write.
//! 3. Displaced record is not newer: accepted, the displaced record is
//!    returned to the caller.
//! 4. Displaced record is newer: a concurrent writer won. Swap the newer
//!    record back in and check again what that swap displaced. The caller's
//!    write is reported as rejected.
//!
//! Step 4 repeats until a swap displaces nothing newer than what was just
//! written. Each repeat means another writer landed in between, so the loop
//! is bounded by the number of racing writers and has no iteration cap.
//!
//! This store is cache-only: when the cache is not ready every operation
//! fails with [`CacheError::Unavailable`]. The one exception is
//! [`OrderedStore::first_timestamp`], which has a durable fallback.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_types::{Entity, OrderedRecord, Timestamped, WriteOutcome};

use crate::adapter::{DurableStore, VolatileCache, ensure_ready};
use crate::entity_cache::EntityCache;
use crate::error::{CacheError, CacheResult};
use crate::keys;

/// Last stored value of a beID, joined with its entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastValue {
    /// Surrogate id the value belongs to.
    #[serde(rename = "beID")]
    pub be_id: String,
    /// Epoch milliseconds of the value.
    #[serde(rename = "timeStamp")]
    pub time_stamp: i64,
    /// The value itself.
    pub value: Value,
    /// Entity behind the beID, if it still exists.
    pub entity: Option<Entity>,
}

/// Monotonic last/previous values, keep-alives and alarm clocks.
#[derive(Clone)]
pub struct OrderedStore {
    pub(crate) cache: Arc<dyn VolatileCache>,
    store: Arc<dyn DurableStore>,
    pub(crate) entities: EntityCache,
}

impl OrderedStore {
    /// Create an ordered-value store over the given adapters.
    pub fn new(cache: Arc<dyn VolatileCache>, store: Arc<dyn DurableStore>) -> Self {
        let entities = EntityCache::new(Arc::clone(&cache), Arc::clone(&store));
        Self {
            cache,
            store,
            entities,
        }
    }

    // =========================================================================
    // Generic monotonic write
    // =========================================================================

    /// Store `record` at `key` unless a newer record is already there.
    ///
    /// Ties are accepted: a record with the same timestamp replaces the
    /// stored one, and the stored one is returned as the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready,
    /// [`CacheError::Serialization`] if a displaced value is not a valid
    /// record, or the cache error if a swap fails.
    pub async fn set_value<T>(&self, key: &str, record: &T) -> CacheResult<WriteOutcome<T>>
    where
        T: Timestamped + Serialize + DeserializeOwned,
    {
        ensure_ready(self.cache.as_ref(), "set", key)?;

        let mut pending = serde_json::to_string(record)?;
        let mut pending_ts = record.timestamp();
        let mut rejected = false;
        let mut restores: u32 = 0;
        loop {
            let displaced = self
                .cache
                .get_and_replace(key, &pending)
                .await
                .inspect_err(|e| tracing::error!(key, error = %e, "Monotonic swap failed"))?;

            let Some(raw) = displaced else {
                return Ok(if rejected {
                    WriteOutcome::Rejected
                } else {
                    WriteOutcome::First
                });
            };
            let prior: T = serde_json::from_str(&raw)
                .inspect_err(|e| tracing::error!(key, error = %e, "Displaced value unreadable"))?;

            if prior.timestamp() <= pending_ts {
                if restores > 0 {
                    tracing::debug!(key, restores, "Newer value restored after race");
                }
                return Ok(if rejected {
                    WriteOutcome::Rejected
                } else {
                    WriteOutcome::Accepted(prior)
                });
            }

            // A newer value was displaced: put it back and re-check.
            rejected = true;
            restores = restores.saturating_add(1);
            pending_ts = prior.timestamp();
            pending = raw;
        }
    }

    /// Read the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready, or
    /// [`CacheError::Serialization`] if the stored value is malformed.
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        ensure_ready(self.cache.as_ref(), "get", key)?;
        let cached = self
            .cache
            .get(key)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Cache read failed"))?;
        match cached {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Last / previous entries
    // =========================================================================

    /// Monotonically store the last value of a beID.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_last_entry<V>(
        &self,
        customer: &str,
        be_id: &str,
        t: i64,
        v: V,
    ) -> CacheResult<WriteOutcome<OrderedRecord<V>>>
    where
        V: Serialize + DeserializeOwned + Send + Sync,
    {
        let key = keys::last_entry(customer, be_id);
        self.set_value(&key, &OrderedRecord::new(t, v)).await
    }

    /// Last value of a beID.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_last_entry<V: DeserializeOwned>(
        &self,
        customer: &str,
        be_id: &str,
    ) -> CacheResult<Option<OrderedRecord<V>>> {
        self.get_value(&keys::last_entry(customer, be_id)).await
    }

    /// Monotonically store the previous value of a beID.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_previous_entry<V>(
        &self,
        customer: &str,
        be_id: &str,
        t: i64,
        v: V,
    ) -> CacheResult<WriteOutcome<OrderedRecord<V>>>
    where
        V: Serialize + DeserializeOwned + Send + Sync,
    {
        let key = keys::previous_entry(customer, be_id);
        self.set_value(&key, &OrderedRecord::new(t, v)).await
    }

    /// Previous value of a beID.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_previous_entry<V: DeserializeOwned>(
        &self,
        customer: &str,
        be_id: &str,
    ) -> CacheResult<Option<OrderedRecord<V>>> {
        self.get_value(&keys::previous_entry(customer, be_id)).await
    }

    /// Every last value stored for a customer, each joined with its entity.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn all_last_values(&self, customer: &str) -> CacheResult<Vec<LastValue>> {
        let pattern = keys::last_entry(customer, "*");
        ensure_ready(self.cache.as_ref(), "scan", &pattern)?;
        let found = self
            .cache
            .keys_matching(&pattern)
            .await
            .inspect_err(|e| tracing::error!(pattern, error = %e, "Key scan failed"))?;

        let values = try_join_all(found.iter().map(|key| async move {
            let Some(be_id) = keys::second_segment(key) else {
                return Ok(None);
            };
            let Some(record) = self.get_value::<OrderedRecord<Value>>(key).await? else {
                return Ok(None);
            };
            let entity = self.entities.get_by_be_id(be_id).await?;
            Ok::<_, CacheError>(Some(LastValue {
                be_id: be_id.to_owned(),
                time_stamp: record.t,
                value: record.v,
                entity,
            }))
        }))
        .await?;
        Ok(values.into_iter().flatten().collect())
    }

    // =========================================================================
    // Keep-alive
    // =========================================================================

    /// Monotonically record the last time a data input of `group` reported.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::set_value`].
    pub async fn set_keep_alive(
        &self,
        customer: &str,
        group: &str,
        suffix: &str,
        time: i64,
    ) -> CacheResult<WriteOutcome<i64>> {
        self.set_value(&keys::keep_alive(customer, group, suffix), &time)
            .await
    }

    /// Last keep-alive time of a data input group.
    ///
    /// # Errors
    ///
    /// See [`OrderedStore::get_value`].
    pub async fn get_keep_alive(
        &self,
        customer: &str,
        group: &str,
        suffix: &str,
    ) -> CacheResult<Option<i64>> {
        self.get_value(&keys::keep_alive(customer, group, suffix))
            .await
    }

    // =========================================================================
    // First timestamp
    // =========================================================================

    /// Epoch milliseconds of the first value registered for a beID.
    ///
    /// Read from the cache, filled from the durable store on a miss. When the
    /// cache is not ready the durable store answers directly.
    ///
    /// # Errors
    ///
    /// Returns the durable store error if the fallback read fails.
    pub async fn first_timestamp(&self, customer: &str, be_id: &str) -> CacheResult<Option<i64>> {
        if !self.cache.is_ready() {
            return self.store.first_timestamp(customer, be_id).await;
        }

        let key = keys::first_timestamp(customer, be_id);
        let cached = self
            .cache
            .get(&key)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Cache read failed"))?;
        if let Some(ts) = cached.as_deref().and_then(|raw| raw.parse::<i64>().ok()) {
            return Ok(Some(ts));
        }

        tracing::debug!(key, "First timestamp not cached, reading from durable store");
        let first = self
            .store
            .first_timestamp(customer, be_id)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "First timestamp lookup failed"))?;
        if let Some(ts) = first {
            self.cache
                .set(&key, &ts.to_string())
                .await
                .inspect_err(|e| tracing::error!(key, error = %e, "Cache write failed"))?;
        }
        Ok(first)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use strata_types::EntityType;

    use super::*;
    use crate::memory::{MemoryCache, MemoryStore};

    fn fixture() -> (Arc<MemoryCache>, Arc<MemoryStore>, OrderedStore) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let ordered = OrderedStore::new(cache.clone(), store.clone());
        (cache, store, ordered)
    }

    #[tokio::test]
    async fn last_entry_scenario() {
        let (_, _, ordered) = fixture();
        assert!(
            ordered
                .get_last_entry::<Value>("C1", "B1")
                .await
                .unwrap()
                .is_none()
        );

        let first = ordered.set_last_entry("C1", "B1", 100, json!({ "v": 1 })).await.unwrap();
        assert_eq!(first, WriteOutcome::First);

        let stale = ordered.set_last_entry("C1", "B1", 50, json!({ "v": 2 })).await.unwrap();
        assert!(stale.is_rejected());
        assert_eq!(
            ordered.get_last_entry::<Value>("C1", "B1").await.unwrap(),
            Some(OrderedRecord::new(100, json!({ "v": 1 })))
        );

        let newer = ordered.set_last_entry("C1", "B1", 200, json!({ "v": 3 })).await.unwrap();
        assert_eq!(newer, WriteOutcome::Accepted(OrderedRecord::new(100, json!({ "v": 1 }))));
        assert_eq!(
            ordered.get_last_entry::<Value>("C1", "B1").await.unwrap(),
            Some(OrderedRecord::new(200, json!({ "v": 3 })))
        );
    }

    #[tokio::test]
    async fn equal_timestamp_is_accepted() {
        let (_, _, ordered) = fixture();
        ordered.set_previous_entry("C1", "B1", 10, json!("a")).await.unwrap();
        let tie = ordered.set_previous_entry("C1", "B1", 10, json!("b")).await.unwrap();
        assert_eq!(tie.previous(), Some(&OrderedRecord::new(10, json!("a"))));
        assert_eq!(
            ordered.get_previous_entry::<Value>("C1", "B1").await.unwrap(),
            Some(OrderedRecord::new(10, json!("b")))
        );
    }

    /// Cache that lands one scripted write right before each swap, yielding
    /// first so spawned writers interleave.
    struct ScriptedCache {
        inner: MemoryCache,
        injected: tokio::sync::Mutex<VecDeque<String>>,
        swaps: AtomicU32,
    }

    impl ScriptedCache {
        fn new(injected: &[&str]) -> Self {
            Self {
                inner: MemoryCache::new(),
                injected: tokio::sync::Mutex::new(
                    injected.iter().map(|v| (*v).to_owned()).collect(),
                ),
                swaps: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VolatileCache for ScriptedCache {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn get_and_replace(&self, key: &str, value: &str) -> CacheResult<Option<String>> {
            tokio::task::yield_now().await;
            let next = self.injected.lock().await.pop_front();
            if let Some(newer) = next {
                self.inner.set(key, &newer).await?;
            }
            self.swaps.fetch_add(1, Ordering::SeqCst);
            self.inner.get_and_replace(key, value).await
        }
        async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> CacheResult<u64> {
            self.inner.delete(key).await
        }
        async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
            self.inner.keys_matching(pattern).await
        }
        fn is_ready(&self) -> bool {
            self.inner.is_ready()
        }
        async fn flush(&self) -> CacheResult<()> {
            self.inner.flush().await
        }
        async fn close(&self) -> CacheResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn racing_newer_writer_is_restored() {
        let cache = Arc::new(ScriptedCache::new(&["500"]));
        let ordered = OrderedStore::new(cache.clone(), Arc::new(MemoryStore::new()));

        let outcome = ordered.set_keep_alive("C1", "G1", "HB", 300).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Rejected);
        assert_eq!(ordered.get_keep_alive("C1", "G1", "HB").await.unwrap(), Some(500));
        assert_eq!(cache.swaps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restore_that_displaces_a_newer_value_loops_again() {
        // 300 displaces 500; restoring 500 displaces 700; restoring 700
        // displaces 500 and settles.
        let cache = Arc::new(ScriptedCache::new(&["500", "700"]));
        let ordered = OrderedStore::new(cache.clone(), Arc::new(MemoryStore::new()));

        let outcome = ordered.set_keep_alive("C1", "G1", "HB", 300).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Rejected);
        assert_eq!(ordered.get_keep_alive("C1", "G1", "HB").await.unwrap(), Some(700));
        assert_eq!(cache.swaps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn restore_chain_has_no_iteration_cap() {
        let script: Vec<String> = (1..=64_i64)
            .map(|i| 1000_i64.saturating_add(i).to_string())
            .collect();
        let script: Vec<&str> = script.iter().map(String::as_str).collect();
        let cache = Arc::new(ScriptedCache::new(&script));
        let ordered = OrderedStore::new(cache.clone(), Arc::new(MemoryStore::new()));

        let outcome = ordered.set_keep_alive("C1", "G1", "HB", 1).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Rejected);
        assert_eq!(ordered.get_keep_alive("C1", "G1", "HB").await.unwrap(), Some(1064));
        assert_eq!(cache.swaps.load(Ordering::SeqCst), 65);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_keep_maximum() {
        let ordered = OrderedStore::new(
            Arc::new(ScriptedCache::new(&[])),
            Arc::new(MemoryStore::new()),
        );
        let mut handles = Vec::new();
        for round in 0..8_i64 {
            for t in [7_i64, 3, 42, 19, 42, 1, 30, 11] {
                let ordered = ordered.clone();
                handles.push(tokio::spawn(async move {
                    ordered
                        .set_keep_alive("C1", "G1", "HB", t.saturating_mul(round))
                        .await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ordered.get_keep_alive("C1", "G1", "HB").await.unwrap(), Some(294));
    }

    #[tokio::test]
    async fn unready_cache_fails_explicitly() {
        let (cache, _, ordered) = fixture();
        cache.set_ready(false);
        assert!(matches!(
            ordered.set_last_entry("C1", "B1", 1, json!(1)).await,
            Err(CacheError::Unavailable { .. })
        ));
        assert!(matches!(
            ordered.get_last_entry::<Value>("C1", "B1").await,
            Err(CacheError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn first_timestamp_falls_back_and_caches() {
        let (cache, store, ordered) = fixture();
        store.set_first_timestamp("C1", "B1", 1_000).await;
        assert_eq!(ordered.first_timestamp("C1", "B1").await.unwrap(), Some(1_000));
        assert_eq!(
            cache.get("C1.B1.FIRST_TIMESTAMP").await.unwrap().as_deref(),
            Some("1000")
        );
        assert_eq!(ordered.first_timestamp("C1", "B2").await.unwrap(), None);

        cache.set_ready(false);
        assert_eq!(ordered.first_timestamp("C1", "B1").await.unwrap(), Some(1_000));
    }

    #[tokio::test]
    async fn all_last_values_join_entities() {
        let (_, store, ordered) = fixture();
        store
            .insert("C1", Entity::new("D1", EntityType::DEVICE).with_be_id("B1"))
            .await
            .unwrap();
        ordered.set_last_entry("C1", "B1", 5, json!(12.5)).await.unwrap();
        ordered.set_last_entry("C1", "B9", 6, json!(1)).await.unwrap();
        ordered.set_last_entry("C2", "B1", 7, json!(0)).await.unwrap();

        let mut values = ordered.all_last_values("C1").await.unwrap();
        values.sort_by(|a, b| a.be_id.cmp(&b.be_id));
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].time_stamp, 5);
        assert_eq!(values[0].entity.as_ref().map(|e| e.id.as_str()), Some("D1"));
        assert!(values[1].entity.is_none());
    }
}
