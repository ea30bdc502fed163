//! In-process store adapters.
//!
//! [`MemoryCache`] and [`MemoryStore`] implement the adapter traits without
//! any external service, for tests and local runs. Each command holds an
//! internal mutex for its own duration only, which reproduces the
//! single-command atomicity a Redis server gives (`GETSET` in particular)
//! without serialising callers across commands.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use strata_types::{CustomerInfo, Entity, EntityType};
use tokio::sync::Mutex;

use crate::adapter::{DurableStore, VolatileCache, table_name};
use crate::config::Environment;
use crate::error::{CacheError, CacheResult};

// =========================================================================
// Volatile cache
// =========================================================================

/// In-memory [`VolatileCache`] with a switchable ready flag.
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, String>>,
    ready: AtomicBool,
    environment: Environment,
}

impl MemoryCache {
    /// An empty, ready cache that allows flushing.
    pub fn new() -> Self {
        Self::with_environment(Environment::Test)
    }

    /// An empty, ready cache for a given environment.
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            ready: AtomicBool::new(true),
            environment,
        }
    }

    /// Simulate the cache going down (`false`) or coming back (`true`).
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn ensure_ready(&self, operation: &'static str, key: &str) -> CacheResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CacheError::unavailable(operation, key))
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolatileCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_ready("get", key)?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn get_and_replace(&self, key: &str, value: &str) -> CacheResult<Option<String>> {
        self.ensure_ready("getset", key)?;
        Ok(self
            .entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned()))
    }

    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.ensure_ready("set", key)?;
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        self.ensure_ready("delete", key)?;
        Ok(u64::from(self.entries.lock().await.remove(key).is_some()))
    }

    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_ready("scan", pattern)?;
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn flush(&self) -> CacheResult<()> {
        if !self.environment.allows_flush() {
            return Err(CacheError::FlushForbidden {
                environment: self.environment.as_str().to_owned(),
            });
        }
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.set_ready(false);
        Ok(())
    }
}

/// Redis glob matching: `*`, `?`, `[abc]`, `[a-z]`, `[^a]`, `\x`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => {
            // Try every suffix of `text`, including the empty one.
            (0..=text.len()).any(|skip| text.get(skip..).is_some_and(|t| glob_match_from(rest, t)))
        }
        Some(('?', rest)) => text
            .split_first()
            .is_some_and(|(_, t)| glob_match_from(rest, t)),
        Some(('[', rest)) => {
            let Some((&c, t)) = text.split_first() else {
                return false;
            };
            match match_class(rest, c) {
                Some((true, after)) => glob_match_from(after, t),
                Some((false, _)) => false,
                // Unterminated class: treat `[` literally.
                None => c == '[' && glob_match_from(rest, t),
            }
        }
        Some(('\\', rest)) if !rest.is_empty() => match (rest.split_first(), text.split_first()) {
            (Some((p, prest)), Some((c, t))) => p == c && glob_match_from(prest, t),
            _ => false,
        },
        Some((p, rest)) => text
            .split_first()
            .is_some_and(|(c, t)| p == c && glob_match_from(rest, t)),
    }
}

/// Match `c` against a class body starting right after `[`.
///
/// Returns whether it matched and the pattern after the closing `]`.
fn match_class(body: &[char], c: char) -> Option<(bool, &[char])> {
    let (negated, mut rest) = match body.split_first() {
        Some(('^', r)) => (true, r),
        _ => (false, body),
    };
    let mut matched = false;
    loop {
        match rest {
            [] => return None,
            [']', after @ ..] => return Some((matched != negated, after)),
            ['\\', lit, after @ ..] => {
                matched |= *lit == c;
                rest = after;
            }
            [lo, '-', hi, after @ ..] if *hi != ']' => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                matched |= (lo..=hi).contains(&c);
                rest = after;
            }
            [lit, after @ ..] => {
                matched |= *lit == c;
                rest = after;
            }
        }
    }
}

// =========================================================================
// Durable store
// =========================================================================

/// In-memory [`DurableStore`] keyed by table name and entity id.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Entity>>>,
    be_ids: Mutex<HashMap<String, (String, EntityType, String)>>,
    customers: Mutex<HashMap<String, CustomerInfo>>,
    first_timestamps: Mutex<HashMap<(String, String), i64>>,
    reads: AtomicU64,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity of `customer`. Its type must be set.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidIdentifier`] if the entity has no type or
    /// the table name is invalid.
    pub async fn insert(&self, customer: &str, entity: Entity) -> CacheResult<()> {
        let entity_type = entity
            .entity_type
            .ok_or_else(|| CacheError::InvalidIdentifier(format!("untyped entity {}", entity.id)))?;
        let table = table_name(customer, entity_type)?;
        if let Some(be_id) = &entity.be_id {
            self.be_ids.lock().await.insert(
                be_id.clone(),
                (customer.to_owned(), entity_type, entity.id.clone()),
            );
        }
        self.tables
            .lock()
            .await
            .entry(table)
            .or_default()
            .insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Remove an entity of `customer`.
    pub async fn remove(&self, customer: &str, id: &str, entity_type: EntityType) {
        if let Ok(table) = table_name(customer, entity_type)
            && let Some(rows) = self.tables.lock().await.get_mut(&table)
            && let Some(Entity { be_id: Some(be_id), .. }) = rows.remove(id)
        {
            self.be_ids.lock().await.remove(&be_id);
        }
    }

    /// Insert or replace a customer record.
    pub async fn insert_customer(&self, customer: &str, info: CustomerInfo) {
        self.customers
            .lock()
            .await
            .insert(customer.to_owned(), info);
    }

    /// Record the first value timestamp of a beID.
    pub async fn set_first_timestamp(&self, customer: &str, be_id: &str, ts: i64) {
        self.first_timestamps
            .lock()
            .await
            .insert((customer.to_owned(), be_id.to_owned()), ts);
    }

    /// Number of single-entity reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn scan(&self, table: &str) -> CacheResult<Vec<Entity>> {
        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
    ) -> CacheResult<Option<Entity>> {
        self.count_read();
        let table = table_name(customer, entity_type)?;
        Ok(self
            .tables
            .lock()
            .await
            .get(&table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn entity_by_be_id(&self, be_id: &str) -> CacheResult<Option<Entity>> {
        let indexed = self.be_ids.lock().await.get(be_id).cloned();
        let Some((customer, entity_type, id)) = indexed else {
            self.count_read();
            return Ok(None);
        };
        let mut found = self
            .entity(&customer, &id, entity_type)
            .await?
            .filter(|e| e.be_id.as_deref() == Some(be_id));
        if let Some(entity) = found.as_mut() {
            entity.tag(entity_type, &customer);
        }
        Ok(found)
    }

    async fn update_entity(
        &self,
        customer: &str,
        id: &str,
        entity_type: EntityType,
        fields: Map<String, Value>,
    ) -> CacheResult<Option<Entity>> {
        let table = table_name(customer, entity_type)?;
        let mut tables = self.tables.lock().await;
        let Some(entity) = tables.get_mut(&table).and_then(|rows| rows.get_mut(id)) else {
            return Ok(None);
        };
        entity.fields.extend(fields);
        Ok(Some(entity.clone()))
    }

    async fn first_timestamp(&self, customer: &str, be_id: &str) -> CacheResult<Option<i64>> {
        Ok(self
            .first_timestamps
            .lock()
            .await
            .get(&(customer.to_owned(), be_id.to_owned()))
            .copied())
    }

    async fn customer(&self, customer: &str) -> CacheResult<Option<CustomerInfo>> {
        self.count_read();
        Ok(self.customers.lock().await.get(customer).cloned())
    }
}
