//! Advisory locks on solution designs.
//!
//! A lock is a `{userID, timeStamp}` record under
//! `{customer}.{design}.SOLUTION_DESIGN_LOCK`. [`DesignLocks::acquire`]
//! overwrites unconditionally; callers that need exclusivity check
//! [`DesignLocks::get`] first under their own serialization. Only the owner
//! can release a lock.
//!
//! The per-customer query semaphore is written by an external query runner;
//! this crate only reads it.

use std::sync::Arc;

use strata_types::DesignLock;

use crate::adapter::{VolatileCache, ensure_ready};
use crate::error::{CacheError, CacheResult};
use crate::keys;

/// Design lock operations.
#[derive(Clone)]
pub struct DesignLocks {
    cache: Arc<dyn VolatileCache>,
}

impl DesignLocks {
    /// Create lock operations over the given cache.
    pub const fn new(cache: Arc<dyn VolatileCache>) -> Self {
        Self { cache }
    }

    /// Current holder of a design, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready, or
    /// [`CacheError::Serialization`] if the stored record is malformed.
    pub async fn get(&self, customer: &str, design_id: &str) -> CacheResult<Option<DesignLock>> {
        let key = keys::design_lock(customer, design_id);
        ensure_ready(self.cache.as_ref(), "get", &key)?;
        let cached = self
            .cache
            .get(&key)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Design lock read failed"))?;
        match cached {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Lock a design for `user_id`, replacing any existing holder.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn acquire(
        &self,
        customer: &str,
        design_id: &str,
        user_id: &str,
    ) -> CacheResult<DesignLock> {
        let key = keys::design_lock(customer, design_id);
        ensure_ready(self.cache.as_ref(), "set", &key)?;
        let lock = DesignLock::now(user_id);
        self.cache
            .set(&key, &serde_json::to_string(&lock)?)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Design lock write failed"))?;
        tracing::debug!(key, user_id, "Design lock acquired");
        Ok(lock)
    }

    /// Release a design held by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LockNotHeld`] if nobody holds the design, or
    /// [`CacheError::LockOwnerMismatch`] if another user does. The lock is
    /// left untouched in both cases.
    pub async fn release(&self, customer: &str, design_id: &str, user_id: &str) -> CacheResult<()> {
        let Some(lock) = self.get(customer, design_id).await? else {
            return Err(CacheError::LockNotHeld {
                resource: design_id.to_owned(),
            });
        };
        if !lock.is_held_by(user_id) {
            tracing::warn!(design_id, user_id, holder = %lock.user_id, "Design lock release by non-owner");
            return Err(CacheError::LockOwnerMismatch {
                resource: design_id.to_owned(),
                user: user_id.to_owned(),
            });
        }
        let key = keys::design_lock(customer, design_id);
        self.cache
            .delete(&key)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Design lock delete failed"))?;
        tracing::debug!(design_id, user_id, "Design lock released");
        Ok(())
    }

    /// Raw value of the customer's query semaphore, if set.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the cache is not ready.
    pub async fn athena_semaphore(&self, customer: &str) -> CacheResult<Option<String>> {
        let key = keys::athena_semaphore(customer);
        ensure_ready(self.cache.as_ref(), "get", &key)?;
        self.cache
            .get(&key)
            .await
            .inspect_err(|e| tracing::error!(key, error = %e, "Semaphore read failed"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;

    fn locks() -> DesignLocks {
        DesignLocks::new(Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn acquire_overwrites_and_is_scoped_per_design() {
        let locks = locks();
        locks.acquire("C1", "SD1", "U1").await.unwrap();
        locks.acquire("C1", "SD2", "U2").await.unwrap();
        assert!(locks.get("C1", "SD1").await.unwrap().unwrap().is_held_by("U1"));

        locks.acquire("C1", "SD1", "U3").await.unwrap();
        assert!(locks.get("C1", "SD1").await.unwrap().unwrap().is_held_by("U3"));
        assert!(locks.get("C1", "SD2").await.unwrap().unwrap().is_held_by("U2"));
    }

    #[tokio::test]
    async fn release_checks_owner() {
        let locks = locks();
        assert!(matches!(
            locks.release("C1", "SD1", "U1").await,
            Err(CacheError::LockNotHeld { .. })
        ));

        locks.acquire("C1", "SD1", "U1").await.unwrap();
        assert!(matches!(
            locks.release("C1", "SD1", "U2").await,
            Err(CacheError::LockOwnerMismatch { .. })
        ));
        assert!(locks.get("C1", "SD1").await.unwrap().is_some());

        locks.release("C1", "SD1", "U1").await.unwrap();
        assert!(locks.get("C1", "SD1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn semaphore_is_read_from_the_cache_only() {
        let cache = Arc::new(MemoryCache::new());
        let locks = DesignLocks::new(cache.clone());
        assert!(locks.athena_semaphore("C1").await.unwrap().is_none());

        cache.set("C1.ATHENA_SEMAPHORE", "busy").await.unwrap();
        assert_eq!(locks.athena_semaphore("C1").await.unwrap().as_deref(), Some("busy"));

        cache.set_ready(false);
        assert!(matches!(
            locks.athena_semaphore("C1").await,
            Err(CacheError::Unavailable { .. })
        ));
    }
}
