//! Entity types for the relationship-mining graph
//!
//! Entities are the nodes of the graph: customers, subscriptions, people,
//! teams, projects, risks and so on, each arriving from one or more source
//! systems with an open attribute map that is validated at the boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::changes::{Record, record_id};

/// An entity resolved from one or more source systems
///
/// `source_ids` maps each contributing source system to the entity's
/// original id there. It is populated as entities are merged, so a
/// resolved entity remembers every record it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier for the entity
    pub id: String,
    /// Declared kind of entity
    pub entity_type: EntityType,
    /// Open attribute map (field name -> value)
    pub attributes: BTreeMap<String, Value>,
    /// Source system this record came from, if known
    pub source: Option<String>,
    /// Source system -> original id, accumulated on merge
    pub source_ids: BTreeMap<String, String>,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f64,
    /// When the record was extracted from its source
    pub extracted_at: DateTime<Utc>,
}

impl Entity {
    /// Create a new entity with no attributes
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            attributes: BTreeMap::new(),
            source: None,
            source_ids: BTreeMap::new(),
            confidence: 1.0,
            extracted_at: Utc::now(),
        }
    }

    /// Build an entity from a raw source record
    ///
    /// Returns `None` when the record has no usable id.
    pub fn from_record(
        source: impl Into<String>,
        entity_type: EntityType,
        record: &Record,
        id_field: &str,
    ) -> Option<Self> {
        let id = record_id(record, id_field)?;
        let source = source.into();
        let attributes = record
            .iter()
            .filter(|(key, _)| key.as_str() != id_field)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut entity = Self::new(id.clone(), entity_type).with_source(source.clone());
        entity.attributes = attributes;
        entity.source_ids.insert(source, id);
        Some(entity)
    }

    /// Set an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the source system
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set confidence score
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the extraction time
    pub fn with_extracted_at(mut self, extracted_at: DateTime<Utc>) -> Self {
        self.extracted_at = extracted_at;
        self
    }

    /// Get an attribute, treating JSON null as absent
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    /// Get an attribute as a non-empty string
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attribute(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Get an attribute rendered as a string (numbers included)
    pub fn attribute_text(&self, key: &str) -> Option<String> {
        match self.attribute(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Get an attribute as a timestamp (RFC 3339 or `YYYY-MM-DD`)
    pub fn attribute_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.attribute_str(key).and_then(parse_timestamp)
    }

    /// Display name, if the entity has one
    pub fn name(&self) -> Option<&str> {
        self.attribute_str("name")
    }

    /// Number of non-null attributes
    pub fn completeness(&self) -> usize {
        self.attributes.values().filter(|v| !v.is_null()).count()
    }
}

/// Parse RFC 3339 timestamps or plain dates (midnight UTC)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Declared kinds of entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A paying or prospective customer account
    Customer,
    /// A customer's subscription or contract
    Subscription,
    /// A product or SKU
    Product,
    /// A team within the organisation
    Team,
    /// An individual (employee or contact)
    Person,
    /// A project or engagement
    Project,
    /// A tracked risk (churn, delivery, security)
    Risk,
    /// A meeting or call
    Meeting,
    /// A support or engineering ticket
    Ticket,
    /// A document or note
    Document,
    /// A generic time-stamped event
    Event,
}

impl EntityType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Subscription => "subscription",
            Self::Product => "product",
            Self::Team => "team",
            Self::Person => "person",
            Self::Project => "project",
            Self::Risk => "risk",
            Self::Meeting => "meeting",
            Self::Ticket => "ticket",
            Self::Document => "document",
            Self::Event => "event",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "customer" | "account" | "company" => Some(Self::Customer),
            "subscription" | "contract" => Some(Self::Subscription),
            "product" => Some(Self::Product),
            "team" => Some(Self::Team),
            "person" | "employee" | "contact" | "user" => Some(Self::Person),
            "project" => Some(Self::Project),
            "risk" => Some(Self::Risk),
            "meeting" | "call" => Some(Self::Meeting),
            "ticket" | "issue" => Some(Self::Ticket),
            "document" | "doc" | "note" => Some(Self::Document),
            "event" => Some(Self::Event),
            _ => None,
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            Self::Customer,
            Self::Subscription,
            Self::Product,
            Self::Team,
            Self::Person,
            Self::Project,
            Self::Risk,
            Self::Meeting,
            Self::Ticket,
            Self::Document,
            Self::Event,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_creation() {
        let entity = Entity::new("cust_001", EntityType::Customer)
            .with_attribute("name", "Acme")
            .with_source("crm")
            .with_confidence(1.4);

        assert_eq!(entity.id, "cust_001");
        assert_eq!(entity.name(), Some("Acme"));
        assert_eq!(entity.source.as_deref(), Some("crm"));
        assert_eq!(entity.confidence, 1.0);
    }

    #[test]
    fn test_from_record() {
        let record = json!({"id": "42", "name": "Acme", "arr": 1000})
            .as_object()
            .cloned()
            .unwrap();
        let entity = Entity::from_record("billing", EntityType::Customer, &record, "id").unwrap();

        assert_eq!(entity.id, "42");
        assert!(!entity.attributes.contains_key("id"));
        assert_eq!(entity.source_ids.get("billing"), Some(&"42".to_string()));
        assert_eq!(entity.completeness(), 2);
    }

    #[test]
    fn test_from_record_without_id() {
        let record = json!({"name": "Acme"}).as_object().cloned().unwrap();
        assert!(Entity::from_record("crm", EntityType::Customer, &record, "id").is_none());
    }

    #[test]
    fn test_null_attributes_are_absent() {
        let entity = Entity::new("1", EntityType::Person)
            .with_attribute("email", Value::Null)
            .with_attribute("age", 41);
        assert!(entity.attribute("email").is_none());
        assert_eq!(entity.attribute_text("age"), Some("41".to_string()));
        assert_eq!(entity.completeness(), 1);
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2024-03-01T10:00:00Z").is_some());
        assert_eq!(
            parse_timestamp("2024-03-01").unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!(EntityType::parse("customer"), Some(EntityType::Customer));
        assert_eq!(EntityType::parse("Account"), Some(EntityType::Customer));
        assert_eq!(EntityType::parse("RISK"), Some(EntityType::Risk));
        assert_eq!(EntityType::parse("widget"), None);
        assert_eq!(EntityType::all().len(), 11);
    }
}
