//! Cache-consistency layer over `Dragonfly` and `PostgreSQL`.
//!
//! `PostgreSQL` is the authoritative record of every entity. `Dragonfly`
//! fronts it with read-through entity caching, monotonic timestamped values
//! and key-pattern queries. The only coordination primitive is the cache's
//! atomic `GETSET`; there are no distributed locks.
//!
//! # Architecture
//!
//! ```text
//! CacheLayer
//!     |
//!     +-- EntityCache -------+--> VolatileCache (DragonflyPool | MemoryCache)
//!     +-- OrderedStore       |
//!     |     +-- alarms       |
//!     +-- KeyCatalog --------+
//!     +-- RelationResolver   |
//!     +-- DesignLocks -------+
//!     +-- BulkRefresh -------+--> DurableStore  (PostgresPool | MemoryStore)
//!     +-- Accounts ----------+
//! ```
//!
//! # Modules
//!
//! - [`adapter`] -- store traits and the durable table naming rule
//! - [`dragonfly`] / [`postgres`] -- production adapters
//! - [`memory`] -- in-process adapters for tests and local runs
//! - [`keys`] -- cache key layout
//! - [`entity_cache`] -- read-through entity cache with tombstones and reload markers
//! - [`ordered`] -- last-writer-by-timestamp records
//! - [`alarms`] -- alarm timestamps and conditions
//! - [`catalog`] -- key-pattern enumeration and counts
//! - [`relations`] -- relation graph traversal
//! - [`design_lock`] -- solution design locks
//! - [`refresh`] -- bulk cache refresh
//! - [`accounts`] -- password expiry upkeep
//! - [`layer`] -- the assembled facade
//! - [`config`] / [`error`] -- configuration and shared error types

pub mod accounts;
pub mod adapter;
pub mod alarms;
pub mod catalog;
pub mod config;
pub mod design_lock;
pub mod dragonfly;
pub mod entity_cache;
pub mod error;
pub mod keys;
pub mod layer;
pub mod memory;
pub mod ordered;
pub mod postgres;
pub mod refresh;
pub mod relations;

// Re-export primary types for convenience.
pub use accounts::{Accounts, PASSWORD_EXPIRY_FIELD};
pub use adapter::{DurableStore, VolatileCache, table_name};
pub use alarms::{AlarmInfo, DEFAULT_ALARM_WINDOW};
pub use catalog::KeyCatalog;
pub use config::{ConfigError, DurableConfig, Environment, StrataConfig};
pub use design_lock::DesignLocks;
pub use dragonfly::DragonflyPool;
pub use entity_cache::EntityCache;
pub use error::{CacheError, CacheResult};
pub use layer::CacheLayer;
pub use memory::{MemoryCache, MemoryStore};
pub use ordered::{LastValue, OrderedStore};
pub use postgres::PostgresPool;
pub use refresh::{BulkRefresh, RefreshReport};
pub use relations::{RelationResolver, RelationSummary};
