//! Relationship builder
//!
//! Derives the base edge set from resolved entities. Three independent
//! sources are unioned and deduplicated on `(source, target, type)`:
//!
//! 1. explicit id references, driven by a rule table
//! 2. temporal precedence between consecutive time-stamped entities
//! 3. semantic links between same-type entities sharing a linking attribute

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::entity::{Entity, EntityType};
use super::relationship::{Relationship, RelationshipType};

/// `(source_type, field) -> (target_type, relationship_type)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitRule {
    pub source_type: EntityType,
    pub field: String,
    pub target_type: EntityType,
    pub relationship_type: RelationshipType,
    /// Also create the mirrored edge
    #[serde(default)]
    pub bidirectional: bool,
}

impl ExplicitRule {
    pub fn new(
        source_type: EntityType,
        field: &str,
        target_type: EntityType,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            source_type,
            field: field.to_string(),
            target_type,
            relationship_type,
            bidirectional: false,
        }
    }

    pub fn mirrored(mut self) -> Self {
        self.bidirectional = true;
        self
    }
}

/// Entities of `entity_type` are ordered by `timestamp_field`
///
/// Entities sharing a timestamp are not linked to each other; each one
/// follows every entity of the previous timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalRule {
    pub entity_type: EntityType,
    pub timestamp_field: String,
}

/// Same-type entities sharing `attribute` are linked by `relationship_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRule {
    pub entity_type: EntityType,
    pub attribute: String,
    pub relationship_type: RelationshipType,
}

/// Builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    pub explicit_rules: Vec<ExplicitRule>,
    pub temporal_rules: Vec<TemporalRule>,
    pub semantic_rules: Vec<SemanticRule>,
    pub explicit_confidence: f64,
    pub temporal_confidence: f64,
    pub semantic_confidence: f64,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        use EntityType::*;
        use RelationshipType::*;

        Self {
            explicit_rules: vec![
                ExplicitRule::new(Subscription, "customer_id", Customer, BelongsTo),
                ExplicitRule::new(Project, "customer_id", Customer, BelongsTo),
                ExplicitRule::new(Person, "team_id", Team, MemberOf),
                ExplicitRule::new(Team, "manager_id", Person, Manages).mirrored(),
                ExplicitRule::new(Project, "owner_id", Person, Owns),
                ExplicitRule::new(Risk, "customer_id", Customer, Affects),
                ExplicitRule::new(Risk, "project_id", Project, Affects),
                ExplicitRule::new(Ticket, "assignee_id", Person, AssignedTo),
            ],
            temporal_rules: vec![
                TemporalRule {
                    entity_type: Meeting,
                    timestamp_field: "date".into(),
                },
                TemporalRule {
                    entity_type: Event,
                    timestamp_field: "occurred_at".into(),
                },
                TemporalRule {
                    entity_type: Ticket,
                    timestamp_field: "created_at".into(),
                },
            ],
            semantic_rules: vec![
                SemanticRule {
                    entity_type: Person,
                    attribute: "project_id".into(),
                    relationship_type: CollaboratesWith,
                },
                SemanticRule {
                    entity_type: Person,
                    attribute: "team_id".into(),
                    relationship_type: CollaboratesWith,
                },
            ],
            explicit_confidence: 1.0,
            temporal_confidence: 0.8,
            semantic_confidence: 0.7,
        }
    }
}

/// Filter applied to the returned relationships only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryContext {
    pub min_confidence: Option<f64>,
    pub excluded_types: BTreeSet<RelationshipType>,
}

impl DiscoveryContext {
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn excluding(mut self, relationship_type: RelationshipType) -> Self {
        self.excluded_types.insert(relationship_type);
        self
    }

    /// Reject thresholds outside 0.0..=1.0
    pub fn validate(&self) -> Result<()> {
        match self.min_confidence {
            Some(min) if !(0.0..=1.0).contains(&min) => Err(Error::InvalidFilter(format!(
                "min_confidence {} is outside 0.0..=1.0",
                min
            ))),
            _ => Ok(()),
        }
    }

    fn admits(&self, rel: &Relationship) -> bool {
        self.min_confidence.is_none_or(|min| rel.confidence >= min)
            && !self.excluded_types.contains(&rel.relationship_type)
    }
}

/// Builds explicit, temporal and semantic relationships
pub struct RelationshipBuilder {
    config: RelationshipConfig,
    last_built: RwLock<Vec<Relationship>>,
}

impl RelationshipBuilder {
    pub fn new() -> Self {
        Self::with_config(RelationshipConfig::default())
    }

    pub fn with_config(config: RelationshipConfig) -> Self {
        Self {
            config,
            last_built: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RelationshipConfig {
        &self.config
    }

    /// Build the deduplicated relationship set
    ///
    /// The full set is retained for [`Self::get_relationships_for_entity`];
    /// `context` filters only what is returned. An out-of-range filter
    /// fails before anything is built.
    pub fn build_relationships(
        &self,
        entities: &[Entity],
        context: Option<&DiscoveryContext>,
    ) -> Result<Vec<Relationship>> {
        if let Some(context) = context {
            context.validate()?;
        }

        let index = EntityIndex::new(entities);
        let explicit = self.explicit_relationships(entities, &index);
        let temporal = self.temporal_relationships(entities);
        let semantic = self.semantic_relationships(entities);

        let (explicit_count, temporal_count, semantic_count) = (explicit.len(), temporal.len(), semantic.len());
        let relationships = deduplicate(explicit.into_iter().chain(temporal).chain(semantic));

        info!(
            entities = entities.len(),
            explicit = explicit_count,
            temporal = temporal_count,
            semantic = semantic_count,
            total = relationships.len(),
            "Built relationships"
        );

        *self.last_built.write() = relationships.clone();

        Ok(match context {
            Some(context) => relationships.into_iter().filter(|r| context.admits(r)).collect(),
            None => relationships,
        })
    }

    /// Relationships from the last build touching `entity_id`
    pub fn get_relationships_for_entity(
        &self,
        entity_id: &str,
        relationship_type: Option<RelationshipType>,
    ) -> Vec<Relationship> {
        self.last_built
            .read()
            .iter()
            .filter(|r| r.involves(entity_id))
            .filter(|r| relationship_type.is_none_or(|t| r.relationship_type == t))
            .cloned()
            .collect()
    }

    fn explicit_relationships(&self, entities: &[Entity], index: &EntityIndex<'_>) -> Vec<Relationship> {
        let mut out = Vec::new();

        for entity in entities {
            for rule in self
                .config
                .explicit_rules
                .iter()
                .filter(|r| r.source_type == entity.entity_type)
            {
                for reference in reference_values(entity, &rule.field) {
                    let Some(target) = index.get(rule.target_type, &reference) else {
                        debug!(
                            entity_id = %entity.id,
                            field = %rule.field,
                            reference = %reference,
                            "Unresolved reference skipped"
                        );
                        continue;
                    };
                    if target.id == entity.id && target.entity_type == entity.entity_type {
                        continue;
                    }

                    let evidence = format!("{}.{} = {}", entity.entity_type, rule.field, reference);
                    let forward = Relationship::new(&entity.id, &target.id, rule.relationship_type)
                        .with_confidence(self.config.explicit_confidence)
                        .with_evidence(evidence.clone());

                    if rule.bidirectional {
                        out.push(
                            Relationship::new(&target.id, &entity.id, rule.relationship_type)
                                .with_confidence(self.config.explicit_confidence)
                                .with_evidence(evidence)
                                .bidirectional(),
                        );
                        out.push(forward.bidirectional());
                    } else {
                        out.push(forward);
                    }
                }
            }
        }

        out
    }

    fn temporal_relationships(&self, entities: &[Entity]) -> Vec<Relationship> {
        let mut out = Vec::new();

        for rule in &self.config.temporal_rules {
            let mut stamped: Vec<_> = entities
                .iter()
                .filter(|e| e.entity_type == rule.entity_type)
                .filter_map(|e| e.attribute_time(&rule.timestamp_field).map(|ts| (ts, e)))
                .collect();
            stamped.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

            // entities sharing a timestamp form one step; each links to the whole next step
            let steps: Vec<_> = stamped.chunk_by(|a, b| a.0 == b.0).collect();
            for pair in steps.windows(2) {
                for &(earlier_at, earlier) in pair[0] {
                    for &(later_at, later) in pair[1] {
                        out.push(
                            Relationship::new(&earlier.id, &later.id, RelationshipType::Precedes)
                                .with_confidence(self.config.temporal_confidence)
                                .with_evidence(format!(
                                    "{} at {} precedes {} at {}",
                                    earlier.id,
                                    earlier_at.to_rfc3339(),
                                    later.id,
                                    later_at.to_rfc3339()
                                )),
                        );
                    }
                }
            }
        }

        out
    }

    fn semantic_relationships(&self, entities: &[Entity]) -> Vec<Relationship> {
        let mut out = Vec::new();

        for rule in &self.config.semantic_rules {
            let mut groups: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
            for entity in entities.iter().filter(|e| e.entity_type == rule.entity_type) {
                if let Some(value) = entity.attribute_text(&rule.attribute) {
                    groups.entry(value).or_default().push(entity);
                }
            }

            for (value, mut members) in groups {
                members.sort_by(|a, b| a.id.cmp(&b.id));
                members.dedup_by(|a, b| a.id == b.id);
                for (i, a) in members.iter().enumerate() {
                    for b in &members[i + 1..] {
                        out.push(
                            Relationship::new(&a.id, &b.id, rule.relationship_type)
                                .with_confidence(self.config.semantic_confidence)
                                .with_evidence(format!("share {} = {}", rule.attribute, value))
                                .bidirectional(),
                        );
                    }
                }
            }
        }

        out
    }
}

impl Default for RelationshipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// type -> id -> entity
struct EntityIndex<'a> {
    by_type: HashMap<EntityType, HashMap<&'a str, &'a Entity>>,
}

impl<'a> EntityIndex<'a> {
    fn new(entities: &'a [Entity]) -> Self {
        let mut by_type: HashMap<EntityType, HashMap<&'a str, &'a Entity>> = HashMap::new();
        for entity in entities {
            let ids = by_type.entry(entity.entity_type).or_default();
            ids.entry(entity.id.as_str()).or_insert(entity);
            for source_id in entity.source_ids.values() {
                ids.entry(source_id.as_str()).or_insert(entity);
            }
        }
        Self { by_type }
    }

    fn get(&self, entity_type: EntityType, id: &str) -> Option<&'a Entity> {
        self.by_type.get(&entity_type)?.get(id).copied()
    }
}

/// Referenced ids held in a field: a scalar or an array of scalars
fn reference_values(entity: &Entity, field: &str) -> Vec<String> {
    match entity.attribute(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(_) => entity.attribute_text(field).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Keep one relationship per `(source, target, type)`, highest confidence wins
fn deduplicate(relationships: impl IntoIterator<Item = Relationship>) -> Vec<Relationship> {
    let mut unique: BTreeMap<(String, String, RelationshipType), Relationship> = BTreeMap::new();
    for rel in relationships {
        match unique.get(&rel.dedup_key()) {
            Some(existing) if existing.confidence >= rel.confidence => {}
            _ => {
                unique.insert(rel.dedup_key(), rel);
            }
        }
    }
    unique.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(id: &str, customer_id: &str) -> Entity {
        Entity::new(id, EntityType::Subscription).with_attribute("customer_id", customer_id)
    }

    #[test]
    fn test_explicit_reference() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            subscription("sub_1", "cust_001"),
            Entity::new("cust_001", EntityType::Customer),
        ];

        let rels = builder.build_relationships(&entities, None).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship_type, RelationshipType::BelongsTo);
        assert_eq!(rels[0].source_id, "sub_1");
        assert_eq!(rels[0].target_id, "cust_001");
        assert_eq!(rels[0].confidence, 1.0);
    }

    #[test]
    fn test_unresolved_reference_skipped() {
        let builder = RelationshipBuilder::new();
        let rels = builder
            .build_relationships(&[subscription("sub_1", "ghost")], None)
            .unwrap();
        assert!(rels.is_empty());
    }

    #[test]
    fn test_reference_must_match_target_type() {
        let builder = RelationshipBuilder::new();
        let entities = vec![subscription("sub_1", "p1"), Entity::new("p1", EntityType::Person)];
        assert!(builder.build_relationships(&entities, None).unwrap().is_empty());
    }

    #[test]
    fn test_bidirectional_rule_mirrors() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            Entity::new("team_a", EntityType::Team).with_attribute("manager_id", "p1"),
            Entity::new("p1", EntityType::Person),
        ];
        let rels = builder.build_relationships(&entities, None).unwrap();

        assert_eq!(rels.len(), 2);
        assert!(rels.iter().all(|r| r.relationship_type == RelationshipType::Manages));
        assert!(rels.iter().all(Relationship::is_bidirectional));
        assert!(rels.iter().any(|r| r.source_id == "p1"));
    }

    #[test]
    fn test_array_references() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            Entity::new("t1", EntityType::Ticket).with_attribute("assignee_id", serde_json::json!(["p1", "p2"])),
            Entity::new("p1", EntityType::Person),
            Entity::new("p2", EntityType::Person),
        ];
        let rels = builder.build_relationships(&entities, None).unwrap();
        assert_eq!(rels.len(), 2);
    }

    #[test]
    fn test_temporal_precedence() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            Entity::new("m3", EntityType::Meeting).with_attribute("date", "2024-03-03"),
            Entity::new("m1", EntityType::Meeting).with_attribute("date", "2024-03-01"),
            Entity::new("m2", EntityType::Meeting).with_attribute("date", "2024-03-02T09:00:00Z"),
            Entity::new("m4", EntityType::Meeting).with_attribute("date", "not a date"),
        ];
        let rels = builder.build_relationships(&entities, None).unwrap();
        let pairs: Vec<_> = rels
            .iter()
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();

        assert_eq!(pairs, vec![("m1", "m2"), ("m2", "m3")]);
        assert!(rels.iter().all(|r| r.confidence == 0.8));
    }

    #[test]
    fn test_temporal_precedence_spans_ties() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            Entity::new("m1", EntityType::Meeting).with_attribute("date", "2024-03-01"),
            Entity::new("m2", EntityType::Meeting).with_attribute("date", "2024-03-02"),
            Entity::new("m3", EntityType::Meeting).with_attribute("date", "2024-03-02"),
            Entity::new("m4", EntityType::Meeting).with_attribute("date", "2024-03-04"),
        ];
        let rels = builder.build_relationships(&entities, None).unwrap();
        let pairs: Vec<_> = rels
            .iter()
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();

        assert_eq!(pairs, vec![("m1", "m2"), ("m1", "m3"), ("m2", "m4"), ("m3", "m4")]);
    }

    #[test]
    fn test_semantic_collaboration() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            Entity::new("alice", EntityType::Person).with_attribute("project_id", "apollo"),
            Entity::new("bob", EntityType::Person).with_attribute("project_id", "apollo"),
            Entity::new("carol", EntityType::Person).with_attribute("project_id", "gemini"),
        ];
        let rels = builder.build_relationships(&entities, None).unwrap();

        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship_type, RelationshipType::CollaboratesWith);
        assert!(rels[0].is_bidirectional());
        assert_eq!(rels[0].confidence, 0.7);
    }

    #[test]
    fn test_dedup_keeps_highest_confidence() {
        let rels = deduplicate(vec![
            Relationship::new("a", "b", RelationshipType::Owns).with_confidence(0.4),
            Relationship::new("a", "b", RelationshipType::Owns).with_confidence(0.9),
            Relationship::new("a", "b", RelationshipType::Manages),
        ]);
        assert_eq!(rels.len(), 2);
        let owns = rels.iter().find(|r| r.relationship_type == RelationshipType::Owns).unwrap();
        assert_eq!(owns.confidence, 0.9);
    }

    #[test]
    fn test_context_filters_returned_set_only() {
        let builder = RelationshipBuilder::new();
        let entities = vec![
            subscription("sub_1", "cust_001"),
            Entity::new("cust_001", EntityType::Customer),
            Entity::new("alice", EntityType::Person).with_attribute("project_id", "x"),
            Entity::new("bob", EntityType::Person).with_attribute("project_id", "x"),
        ];

        let context = DiscoveryContext::default().with_min_confidence(0.9);
        let rels = builder.build_relationships(&entities, Some(&context)).unwrap();
        assert_eq!(rels.len(), 1);

        let context = DiscoveryContext::default().excluding(RelationshipType::BelongsTo);
        let rels = builder.build_relationships(&entities, Some(&context)).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship_type, RelationshipType::CollaboratesWith);

        // retained state is unfiltered
        assert_eq!(builder.get_relationships_for_entity("sub_1", None).len(), 1);
        assert_eq!(
            builder
                .get_relationships_for_entity("alice", Some(RelationshipType::BelongsTo))
                .len(),
            0
        );
    }

    #[test]
    fn test_invalid_filter_fails() {
        let builder = RelationshipBuilder::new();
        let context = DiscoveryContext::default().with_min_confidence(1.5);
        let err = builder.build_relationships(&[], Some(&context)).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }
}
