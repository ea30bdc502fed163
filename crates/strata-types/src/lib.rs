//! Shared data model for the Strata cache-consistency layer.
//!
//! Serde field names follow the JSON already stored in deployed caches and
//! durable tables, so these types can read and write existing records.
//!
//! # Modules
//!
//! - [`entity`] -- Entities, `{ID, TYPE}` references, customer records
//! - [`record`] -- Time-stamped records and monotonic write outcomes
//! - [`lock`] -- Advisory design lock record

pub mod entity;
pub mod lock;
pub mod record;

pub use entity::{BusinessInfo, CustomerInfo, Entity, EntityRef, EntityType};
pub use lock::DesignLock;
pub use record::{AlarmCondition, OrderedRecord, Timestamped, WriteOutcome};
