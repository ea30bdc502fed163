//! Time-stamped records kept by the ordered-value store.
//!
//! Every record exposes its timestamp through [`Timestamped`]; the store
//! only ever compares those timestamps, so the same monotonic write path
//! serves full `{t, v}` records, alarm condition results, and bare epoch
//! integers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value carrying the timestamp used for monotonic ordering.
pub trait Timestamped {
    /// Epoch milliseconds of this record.
    fn timestamp(&self) -> i64;
}

/// Bare epoch timestamps (alarm evaluation/execution times, keep-alives).
impl Timestamped for i64 {
    fn timestamp(&self) -> i64 {
        *self
    }
}

/// `{t, v}` pair stored under last/previous entry keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedRecord<V> {
    /// Epoch milliseconds.
    pub t: i64,
    /// Payload.
    pub v: V,
}

impl<V> OrderedRecord<V> {
    /// Build a record.
    pub const fn new(t: i64, v: V) -> Self {
        Self { t, v }
    }
}

impl<V> Timestamped for OrderedRecord<V> {
    fn timestamp(&self) -> i64 {
        self.t
    }
}

/// Result of the last executed alarm condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmCondition {
    /// Epoch milliseconds of the evaluation.
    pub t: i64,
    /// Whether the condition triggered.
    pub r: bool,
    /// Observed value.
    pub v: Value,
}

impl Timestamped for AlarmCondition {
    fn timestamp(&self) -> i64 {
        self.t
    }
}

/// Outcome of a monotonic write.
///
/// Distinguishes a first write, an accepted overwrite (carrying the record
/// it displaced), and a write that lost to a newer timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// No record existed before this write.
    First,
    /// The write was stored; the displaced record is returned.
    Accepted(T),
    /// A record with a newer timestamp was already stored; the write was undone.
    Rejected,
}

impl<T> WriteOutcome<T> {
    /// True when the write lost to a newer record.
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// The displaced record for an accepted overwrite.
    pub const fn previous(&self) -> Option<&T> {
        match self {
            Self::Accepted(prev) => Some(prev),
            Self::First | Self::Rejected => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ordered_record_wire_format() {
        let rec = OrderedRecord::new(100, json!({ "v": 1 }));
        assert_eq!(serde_json::to_string(&rec).unwrap(), r#"{"t":100,"v":{"v":1}}"#);
    }

    #[test]
    fn bare_timestamp_is_plain_integer() {
        assert_eq!(serde_json::to_string(&1_700_000_000_000_i64).unwrap(), "1700000000000");
        assert_eq!(1_i64.timestamp(), 1);
    }

    #[test]
    fn outcome_helpers() {
        let accepted = WriteOutcome::Accepted(3);
        assert_eq!(accepted.previous(), Some(&3));
        assert!(!accepted.is_rejected());
        assert!(WriteOutcome::<i64>::Rejected.is_rejected());
        assert_eq!(WriteOutcome::<i64>::First.previous(), None);
    }
}
