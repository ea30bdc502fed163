//! Entities, entity references, and customer records.
//!
//! Entities are stored as JSON objects whose field names follow the
//! deployed wire format (`ID`, `TYPE`, `beID`, `ID_CUSTOMER`, `CHILD`).
//! Only the identity fields are typed; everything else is kept verbatim in
//! [`Entity::fields`] so that records round-trip through the cache without
//! losing attributes this layer does not interpret.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Small integer tag identifying an entity's table/category.
///
/// Appears verbatim in cache keys (`{customer}.{id}.{type}`), so the
/// numeric values are part of the key format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub u16);

/// Generates the named [`EntityType`] constants and their table stems.
macro_rules! define_entity_types {
    (
        $(
            $(#[$meta:meta])*
            $name:ident = $value:literal => $table:literal
        ),+ $(,)?
    ) => {
        impl EntityType {
            $(
                $(#[$meta])*
                pub const $name: Self = Self($value);
            )+

            /// Table stem used by the durable store for this type, if known.
            pub const fn name(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some($table), )+
                    _ => None,
                }
            }
        }
    };
}

define_entity_types! {
    /// Application users.
    USER = 1 => "USER",
    /// Permission profiles attached to users.
    PROFILE = 2 => "PROFILE",
    /// Field devices and equipment.
    DEVICE = 3 => "DEVICE",
    /// Process definitions.
    PROCESS = 4 => "PROCESS",
    /// Alarm/monitoring agents.
    AGENT = 5 => "AGENT",
    /// Value associations.
    ASSOCIATION = 6 => "ASSOCIATION",
    /// Predictive models.
    PREDICTION_MODEL = 7 => "PREDICTION_MODEL",
    /// Solution designs.
    SOLUTION = 8 => "SOLUTION",
    /// Scenarios.
    SCENARIO = 9 => "SCENARIO",
    /// Pseudo-entity holding an adjacency list in `CHILD`.
    RELATIONSHIP = 20 => "RELATIONSHIP",
}

impl EntityType {
    /// Entity tables that are resynchronised by a bulk refresh.
    pub const REFRESHABLE: [Self; 10] = [
        Self::USER,
        Self::PROFILE,
        Self::DEVICE,
        Self::PROCESS,
        Self::AGENT,
        Self::ASSOCIATION,
        Self::PREDICTION_MODEL,
        Self::SOLUTION,
        Self::SCENARIO,
        Self::RELATIONSHIP,
    ];
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityType {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u16>().map(Self)
    }
}

impl From<u16> for EntityType {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// An `{ID, TYPE}` reference to another entity of the same customer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Customer-scoped entity id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Entity type of the referenced record.
    #[serde(rename = "TYPE")]
    pub entity_type: EntityType,
}

impl EntityRef {
    /// Build a reference from an id and a type.
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
        }
    }
}

/// An entity record as stored in the cache and in the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Customer-scoped id.
    #[serde(rename = "ID")]
    pub id: String,

    /// Entity type; absent on raw durable rows until tagged.
    #[serde(rename = "TYPE", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,

    /// Global surrogate identifier, unique across customers.
    #[serde(rename = "beID", default, skip_serializing_if = "Option::is_none")]
    pub be_id: Option<String>,

    /// Owning customer.
    #[serde(rename = "ID_CUSTOMER", default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,

    /// Every other attribute, kept verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Create an entity with only its identity set.
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type: Some(entity_type),
            be_id: None,
            customer: None,
            fields: Map::new(),
        }
    }

    /// Create a relationship record whose `CHILD` list is `children`.
    pub fn relationship(id: impl Into<String>, children: &[EntityRef]) -> Self {
        let child = children
            .iter()
            .map(|c| {
                let mut obj = Map::new();
                obj.insert("ID".to_owned(), Value::String(c.id.clone()));
                obj.insert("TYPE".to_owned(), Value::from(c.entity_type.0));
                Value::Object(obj)
            })
            .collect();
        Self::new(id, EntityType::RELATIONSHIP).with_field("CHILD", Value::Array(child))
    }

    /// Set the surrogate id.
    #[must_use]
    pub fn with_be_id(mut self, be_id: impl Into<String>) -> Self {
        self.be_id = Some(be_id.into());
        self
    }

    /// Set the owning customer.
    #[must_use]
    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = Some(customer.into());
        self
    }

    /// Set an arbitrary attribute.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_owned(), value);
        self
    }

    /// Stamp a raw durable row with its type and customer.
    pub fn tag(&mut self, entity_type: EntityType, customer: &str) {
        self.entity_type = Some(entity_type);
        self.customer = Some(customer.to_owned());
    }

    /// `{ID, TYPE}` reference to this entity, if its type is known.
    pub fn reference(&self) -> Option<EntityRef> {
        self.entity_type.map(|t| EntityRef::new(self.id.clone(), t))
    }

    /// Raw attribute lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Child references stored in `CHILD` when it is a list.
    ///
    /// Elements that are not valid `{ID, TYPE}` objects are skipped.
    pub fn children(&self) -> Vec<EntityRef> {
        match self.fields.get("CHILD") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Profile ids listed under `CHILD.profiles` (user records).
    pub fn profile_ids(&self) -> Vec<String> {
        self.fields
            .get("CHILD")
            .and_then(|c| c.get("profiles"))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `DATA_TYPE` attribute.
    pub fn data_type(&self) -> Option<&str> {
        self.fields.get("DATA_TYPE").and_then(Value::as_str)
    }

    /// `NOTIFY_ACK` attribute.
    pub fn notify_ack(&self) -> Option<bool> {
        self.fields.get("NOTIFY_ACK").and_then(Value::as_bool)
    }

    /// `ENTITY_NAME` indirection used by value records.
    pub fn entity_name(&self) -> Option<EntityRef> {
        self.fields
            .get("ENTITY_NAME")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// `GEO_LOCATION` attribute.
    pub fn geo_location(&self) -> Option<&Value> {
        self.fields.get("GEO_LOCATION")
    }
}

/// Business details of a customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessInfo {
    /// Bucket holding the customer's uploaded files.
    #[serde(rename = "FILE_BUCKET", default, skip_serializing_if = "Option::is_none")]
    pub file_bucket: Option<String>,

    /// Every other attribute, kept verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Customer (tenant) record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfo {
    /// Business details.
    #[serde(rename = "BUSINESS_INFO", default, skip_serializing_if = "Option::is_none")]
    pub business_info: Option<BusinessInfo>,

    /// Every other attribute, kept verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CustomerInfo {
    /// The customer's file bucket, if configured.
    pub fn file_bucket(&self) -> Option<&str> {
        self.business_info
            .as_ref()
            .and_then(|b| b.file_bucket.as_deref())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn entity_keeps_unknown_fields() {
        let raw = json!({
            "ID": "U1",
            "TYPE": 1,
            "beID": "B1",
            "EMAIL": "u1@example.com",
            "CHILD": { "profiles": ["P1", "P2"] }
        });
        let entity: Entity = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entity.entity_type, Some(EntityType::USER));
        assert_eq!(entity.be_id.as_deref(), Some("B1"));
        assert_eq!(entity.profile_ids(), vec!["P1", "P2"]);
        assert!(entity.children().is_empty());
        assert_eq!(serde_json::to_value(&entity).unwrap(), raw);
    }

    #[test]
    fn relationship_children_round_trip() {
        let refs = vec![
            EntityRef::new("A1", EntityType::AGENT),
            EntityRef::new("D1", EntityType::DEVICE),
        ];
        let record = Entity::relationship("AGENT.B1", &refs);
        assert_eq!(record.entity_type, Some(EntityType::RELATIONSHIP));
        assert_eq!(record.children(), refs);
    }

    #[test]
    fn malformed_children_are_skipped() {
        let record = Entity::new("X", EntityType::RELATIONSHIP)
            .with_field("CHILD", json!([{ "ID": "A" }, { "ID": "B", "TYPE": 5 }]));
        assert_eq!(record.children(), vec![EntityRef::new("B", EntityType::AGENT)]);
    }

    #[test]
    fn entity_type_names_and_parse() {
        assert_eq!(EntityType::USER.name(), Some("USER"));
        assert_eq!(EntityType(999).name(), None);
        assert_eq!("20".parse::<EntityType>().unwrap(), EntityType::RELATIONSHIP);
        assert_eq!(EntityType::AGENT.to_string(), "5");
    }

    #[test]
    fn customer_file_bucket() {
        let info: CustomerInfo =
            serde_json::from_value(json!({ "BUSINESS_INFO": { "FILE_BUCKET": "bkt" } })).unwrap();
        assert_eq!(info.file_bucket(), Some("bkt"));
        assert_eq!(CustomerInfo::default().file_bucket(), None);
    }
}
