//! Cache key scheme.
//!
//! Pure functions mapping identifiers to cache keys. The formats are shared
//! with existing deployments and must stay bit-exact.
//!
//! # Key Patterns
//!
//! | Pattern | Value | Description |
//! |---------|-------|-------------|
//! | `{customer}.{id}.{type}` | JSON entity / tombstone / reload marker | Entity by customer key |
//! | `{beID}` | JSON entity / tombstone / reload marker | Entity by surrogate id |
//! | `0.{customer}` | JSON customer | Customer record |
//! | `{customer}.{beID}.LAST_ENTRY` | `{t, v}` | Last stored value |
//! | `{customer}.{beID}.PREVIOUS_ENTRY` | `{t, v}` | Previous stored value |
//! | `{customer}.{beID}.{agent}.{alarm}.ALARM_EVAL_LAST_TIME` | Integer | Last alarm evaluation |
//! | `{customer}.{beID}.{agent}.{alarm}.ALARM_EXEC_LAST_TIME` | Integer | Last alarm execution |
//! | `{customer}.{agent}.{alarm}.LAST_TIME_ALARM` | Integer | Last time the alarm fired |
//! | `{customer}.{beID}.{agent}.{alarm}.ALARM_LAST_CONDITION` | `{t, r, v}` | Last condition result |
//! | `{customer}.{beID}.FIRST_TIMESTAMP` | Integer | First registered value time |
//! | `{customer}.{group}.{suffix}` | Integer | Data-input keep-alive |
//! | `{customer}.{design}.SOLUTION_DESIGN_LOCK` | `{userID, timeStamp}` | Design lock |
//! | `{customer}.ATHENA_SEMAPHORE` | Opaque string | Query semaphore, written externally |
//!
//! Relationship records are ordinary entity keys of type
//! [`EntityType::RELATIONSHIP`] whose id is derived by [`relation_id`] and
//! friends, e.g. `{customer}.AGENT.{beID}.20`.

use strata_types::EntityType;

/// Prefix of customer record keys.
const CUSTOMER: u8 = 0;

const SUFFIX_LAST_ENTRY: &str = ".LAST_ENTRY";
const SUFFIX_PREVIOUS_ENTRY: &str = ".PREVIOUS_ENTRY";
const SUFFIX_ALARM_EVAL: &str = ".ALARM_EVAL_LAST_TIME";
const SUFFIX_ALARM_EXEC: &str = ".ALARM_EXEC_LAST_TIME";
const SUFFIX_LAST_ALARM: &str = ".LAST_TIME_ALARM";
const SUFFIX_LAST_CONDITION: &str = ".ALARM_LAST_CONDITION";
const SUFFIX_VALUE_TYPE: &str = ".VALUE_TYPE";
const SUFFIX_FIRST_TIMESTAMP: &str = ".FIRST_TIMESTAMP";
const SUFFIX_SOLUTION_DESIGN_LOCK: &str = ".SOLUTION_DESIGN_LOCK";
const SUFFIX_ATHENA_SEMAPHORE: &str = ".ATHENA_SEMAPHORE";

/// Cached marker for "looked up and confirmed absent".
///
/// Not valid JSON, so it can never collide with a stored payload.
pub const TOMBSTONE: &str = "__DOESNT_EXIST__";

/// Cached marker for "stale, reload from the durable store".
pub const RELOAD_MARKER: &str = "__RELOAD__";

/// `{customer}.{id}.{type}`
pub fn entity(customer: &str, id: &str, entity_type: EntityType) -> String {
    format!("{customer}.{id}.{entity_type}")
}

/// Entity key whose type segment is a raw pattern (`*`, `?`, classes).
pub fn entity_pattern(customer: &str, id: &str, type_pattern: &str) -> String {
    format!("{customer}.{id}.{type_pattern}")
}

/// Surrogate key: the beID itself.
pub fn be_id(be_id: &str) -> String {
    be_id.to_owned()
}

/// `0.{customer}`
pub fn customer(customer: &str) -> String {
    format!("{CUSTOMER}.{customer}")
}

/// `{customer}.{beID}.LAST_ENTRY`
pub fn last_entry(customer: &str, be_id: &str) -> String {
    format!("{customer}.{be_id}{SUFFIX_LAST_ENTRY}")
}

/// `{customer}.{beID}.PREVIOUS_ENTRY`
pub fn previous_entry(customer: &str, be_id: &str) -> String {
    format!("{customer}.{be_id}{SUFFIX_PREVIOUS_ENTRY}")
}

/// Which alarm clock a timestamp key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmClock {
    /// Last evaluation of the alarm.
    Evaluation,
    /// Last execution of the alarm.
    Execution,
    /// Last time the alarm fired.
    LastAlarm,
}

impl AlarmClock {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Evaluation => SUFFIX_ALARM_EVAL,
            Self::Execution => SUFFIX_ALARM_EXEC,
            Self::LastAlarm => SUFFIX_LAST_ALARM,
        }
    }
}

/// `{customer}.{beID}.{agent}.{alarm}{suffix}`, or without the beID segment
/// when `be_id` is `None`.
pub fn alarm_time(
    clock: AlarmClock,
    customer: &str,
    be_id: Option<&str>,
    agent_id: &str,
    alarm_id: &str,
) -> String {
    let suffix = clock.suffix();
    match be_id {
        Some(be_id) => format!("{customer}.{be_id}.{agent_id}.{alarm_id}{suffix}"),
        None => format!("{customer}.{agent_id}.{alarm_id}{suffix}"),
    }
}

/// `{customer}.{beID}.{agent}.{alarm}.ALARM_LAST_CONDITION`
pub fn alarm_condition(customer: &str, be_id: &str, agent_id: &str, alarm_id: &str) -> String {
    format!("{customer}.{be_id}.{agent_id}.{alarm_id}{SUFFIX_LAST_CONDITION}")
}

/// Pattern matching every last-condition key of a customer.
pub fn alarm_condition_pattern(customer: &str) -> String {
    format!("{customer}.*{SUFFIX_LAST_CONDITION}")
}

/// `{customer}.{beID}.FIRST_TIMESTAMP`
pub fn first_timestamp(customer: &str, be_id: &str) -> String {
    format!("{customer}.{be_id}{SUFFIX_FIRST_TIMESTAMP}")
}

/// `{customer}.{group}.{suffix}`
pub fn keep_alive(customer: &str, group: &str, suffix: &str) -> String {
    format!("{customer}.{group}.{suffix}")
}

/// `{customer}.{beID}.VALUE_TYPE`
pub fn value_type(customer: &str, be_id: &str) -> String {
    format!("{customer}.{be_id}{SUFFIX_VALUE_TYPE}")
}

/// Extract the beID from a [`value_type`] key.
pub fn be_id_from_value_type<'a>(customer: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(customer)?
        .strip_prefix('.')?
        .strip_suffix(SUFFIX_VALUE_TYPE)
}

/// `{customer}.{design}.SOLUTION_DESIGN_LOCK`
pub fn design_lock(customer: &str, design_id: &str) -> String {
    format!("{customer}.{design_id}{SUFFIX_SOLUTION_DESIGN_LOCK}")
}

/// `{customer}.ATHENA_SEMAPHORE`
pub fn athena_semaphore(customer: &str) -> String {
    format!("{customer}{SUFFIX_ATHENA_SEMAPHORE}")
}

/// Second segment of a dotted key (the beID of per-entity keys).
pub fn second_segment(key: &str) -> Option<&str> {
    key.split('.').nth(1)
}

/// Glob that matches `s` regardless of ASCII case (`ab` -> `[Aa][Bb]`).
pub fn ignore_case_pattern(s: &str) -> String {
    s.chars()
        .map(|c| {
            let upper: String = c.to_uppercase().collect();
            let lower: String = c.to_lowercase().collect();
            format!("[{upper}{lower}]")
        })
        .collect()
}

// =========================================================================
// Relationship record ids
// =========================================================================

/// Relation kinds stored per beID as `{KIND}.{beID}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelationKind {
    /// Agents monitoring the entity.
    Agent,
    /// Value-association children.
    Child,
    /// Parent entities.
    Parent,
    /// Scenarios the entity takes part in.
    Scenario,
}

impl RelationKind {
    /// Every kind unioned by an immediate-relations lookup.
    pub const ALL: [Self; 4] = [Self::Agent, Self::Child, Self::Parent, Self::Scenario];

    /// Segment used inside the relationship id.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "AGENT",
            Self::Child => "CHILD",
            Self::Parent => "PARENT",
            Self::Scenario => "SCENARIO",
        }
    }

    /// Name reported in relation summaries (`CHILD` is a value association).
    pub const fn summary_name(self) -> &'static str {
        match self {
            Self::Child => "VALUE_ASSOCIATION",
            other => other.as_str(),
        }
    }

    /// Parse a relationship id segment.
    pub fn parse(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == segment)
    }
}

/// `{KIND}.{beID}`
pub fn relation_id(kind: RelationKind, be_id: &str) -> String {
    format!("{}.{be_id}", kind.as_str())
}

/// Relationship ids of every [`RelationKind`] for a beID.
pub fn all_relation_ids(be_id: &str) -> Vec<String> {
    RelationKind::ALL
        .into_iter()
        .map(|kind| relation_id(kind, be_id))
        .collect()
}

/// `VALUE.{beID}` -- present when the entity has recorded values.
pub fn value_id(be_id: &str) -> String {
    format!("VALUE.{be_id}")
}

/// `EMAIL.{email}`
pub fn email_id(email: &str) -> String {
    format!("EMAIL.{email}")
}

/// `ISA_TAG.{tag}`
pub fn isa_tag_id(tag: &str) -> String {
    format!("ISA_TAG.{tag}")
}

/// `CUSTOM_TAG.{tag}`
pub fn custom_tag_id(tag: &str) -> String {
    format!("CUSTOM_TAG.{tag}")
}

/// `SOLUTION.{code}`
pub fn solution_code_id(code: &str) -> String {
    format!("SOLUTION.{code}")
}

/// Relationship-id fragments that are not per-entity relations.
pub const NON_RELATION_MARKERS: [&str; 9] = [
    ".EMAIL.",
    ".SOLUTION_EXECUTION.",
    ".SOLUTION.",
    ".VALUE.",
    ".PROFILE.",
    ".CUSTOM_TAG.",
    ".BEDATAFEEDER.",
    ".ISA_TAG.",
    ".VA.PARENT",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_and_surrogate_keys() {
        assert_eq!(entity("C1", "U1", EntityType::USER), "C1.U1.1");
        assert_eq!(be_id("B1"), "B1");
        assert_eq!(customer("C1"), "0.C1");
    }

    #[test]
    fn ordered_value_keys() {
        assert_eq!(last_entry("C1", "B1"), "C1.B1.LAST_ENTRY");
        assert_eq!(previous_entry("C1", "B1"), "C1.B1.PREVIOUS_ENTRY");
        assert_eq!(
            alarm_time(AlarmClock::Evaluation, "C1", Some("B1"), "A1", "AL1"),
            "C1.B1.A1.AL1.ALARM_EVAL_LAST_TIME"
        );
        assert_eq!(
            alarm_time(AlarmClock::Execution, "C1", Some("B1"), "A1", "AL1"),
            "C1.B1.A1.AL1.ALARM_EXEC_LAST_TIME"
        );
        assert_eq!(
            alarm_time(AlarmClock::LastAlarm, "C1", None, "A1", "AL1"),
            "C1.A1.AL1.LAST_TIME_ALARM"
        );
        assert_eq!(
            alarm_condition("C1", "B1", "A1", "AL1"),
            "C1.B1.A1.AL1.ALARM_LAST_CONDITION"
        );
        assert_eq!(first_timestamp("C1", "B1"), "C1.B1.FIRST_TIMESTAMP");
        assert_eq!(keep_alive("C1", "G1", "HEARTBEAT"), "C1.G1.HEARTBEAT");
    }

    #[test]
    fn design_lock_key() {
        assert_eq!(design_lock("C1", "SD1"), "C1.SD1.SOLUTION_DESIGN_LOCK");
        assert_eq!(athena_semaphore("C1"), "C1.ATHENA_SEMAPHORE");
    }

    #[test]
    fn value_type_round_trip() {
        let key = value_type("C1", "B1");
        assert_eq!(key, "C1.B1.VALUE_TYPE");
        assert_eq!(be_id_from_value_type("C1", &key), Some("B1"));
        assert_eq!(be_id_from_value_type("C2", &key), None);
    }

    #[test]
    fn relationship_ids() {
        assert_eq!(relation_id(RelationKind::Agent, "B1"), "AGENT.B1");
        assert_eq!(
            all_relation_ids("B1"),
            vec!["AGENT.B1", "CHILD.B1", "PARENT.B1", "SCENARIO.B1"]
        );
        assert_eq!(email_id("a@b.c"), "EMAIL.a@b.c");
        assert_eq!(RelationKind::parse("CHILD"), Some(RelationKind::Child));
        assert_eq!(RelationKind::Child.summary_name(), "VALUE_ASSOCIATION");
        assert_eq!(RelationKind::parse("EMAIL"), None);
    }

    #[test]
    fn sentinels_are_not_json() {
        assert!(serde_json::from_str::<serde_json::Value>(TOMBSTONE).is_err());
        assert!(serde_json::from_str::<serde_json::Value>(RELOAD_MARKER).is_err());
    }

    #[test]
    fn ignore_case() {
        assert_eq!(ignore_case_pattern("aB1"), "[Aa][Bb][11]");
    }
}
