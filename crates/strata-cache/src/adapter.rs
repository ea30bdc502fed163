//! Store adapter traits.
//!
//! The layer talks to its two stores only through these traits. Production
//! implementations live in [`crate::dragonfly`] and [`crate::postgres`];
//! [`crate::memory`] provides in-process ones for tests and local runs.

use async_trait::async_trait;
use serde_json::{Map, Value};
use strata_types::{CustomerInfo, Entity, EntityType};

use crate::error::{CacheError, CacheResult};

/// Fast, volatile key-value cache (Redis-compatible semantics).
///
/// Values are strings. `get_and_replace` must be a single atomic
/// read-and-replace; it is the only coordination primitive the layer uses.
#[async_trait]
pub trait VolatileCache: Send + Sync {
    /// Read the value at `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Atomically store `value` at `key`, returning what it displaced.
    async fn get_and_replace(&self, key: &str, value: &str) -> CacheResult<Option<String>>;

    /// Store `value` at `key`.
    async fn set(&self, key: &str, value: &str) -> CacheResult<()>;

    /// Delete `key`, returning the number of keys removed.
    async fn delete(&self, key: &str) -> CacheResult<u64>;

    /// Every key matching a glob `pattern` (`*`, `?`, `[..]`).
    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Whether the cache is connected and serving commands.
    fn is_ready(&self) -> bool;

    /// Remove every key. Refused in production environments.
    async fn flush(&self) -> CacheResult<()>;

    /// Close the connection.
    async fn close(&self) -> CacheResult<()>;
}

/// Durable, authoritative entity store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Every record of a table (see [`table_name`]).
    async fn scan(&self, table: &str) -> CacheResult<Vec<Entity>>;

    /// One entity by its customer-scoped key.
    async fn entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<Entity>>;

    /// One entity by its surrogate id, tagged with the customer and type it
    /// is stored under.
    async fn entity_by_be_id(&self, be_id: &str) -> CacheResult<Option<Entity>>;

    /// Merge `fields` into an entity, returning the updated record.
    async fn update_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
        fields: Map<String, Value>,
    ) -> CacheResult<Option<Entity>>;

    /// Epoch milliseconds of the first value registered for a beID.
    async fn first_timestamp(&self, customer: &str, be_id: &str) -> CacheResult<Option<i64>>;

    /// Customer record.
    async fn customer(&self, customer: &str) -> CacheResult<Option<CustomerInfo>>;
}

/// Fail with [`CacheError::Unavailable`] unless `cache` is ready.
pub(crate) fn ensure_ready(
    cache: &dyn VolatileCache,
    operation: &'static str,
    key: &str,
) -> CacheResult<()> {
    if cache.is_ready() {
        Ok(())
    } else {
        tracing::warn!(key, operation, "Cache not ready");
        Err(CacheError::unavailable(operation, key))
    }
}

/// Durable table holding a customer's entities of one type:
/// `{customer}_{type name}`, lowercased.
///
/// # Errors
///
/// Returns [`CacheError::InvalidIdentifier`] if the type has no table or the
/// customer contains characters outside `[A-Za-z0-9_-]`.
pub fn table_name(customer: &str, entity_type: EntityType) -> CacheResult<String> {
    let stem = entity_type
        .name()
        .ok_or_else(|| CacheError::InvalidIdentifier(format!("entity type {entity_type}")))?;
    let valid = !customer.is_empty()
        && customer
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(CacheError::InvalidIdentifier(format!("customer {customer:?}")));
    }
    Ok(format!("{customer}_{stem}").to_ascii_lowercase())
}
