//! Relationships between entities
//!
//! Relationships are the edges of the graph. Explicit ones come from id
//! references between records; discovered ones (precedence, influence,
//! correlation, multi-hop connections) are inferred by the analysers and
//! carry an evidence string, and multi-hop ones carry the full path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A relationship between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Deterministic identifier: `source|TYPE|target`
    pub id: String,
    /// ID of the source entity
    pub source_id: String,
    /// ID of the target entity
    pub target_id: String,
    /// Type of relationship
    pub relationship_type: RelationshipType,
    /// Whether the edge reads both ways
    pub direction: Direction,
    /// Confidence in the relationship (0.0 to 1.0)
    pub confidence: f64,
    /// Coarse strength bucket derived from confidence
    pub strength: Strength,
    /// Entity ids from source to target, non-empty only when inferred
    pub path: Vec<String>,
    /// Human-readable justification
    pub evidence: Option<String>,
    /// When the relationship was built or discovered
    pub discovered_at: DateTime<Utc>,
}

impl Relationship {
    /// Create a new directed relationship with full confidence
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();

        Self {
            id: Self::key(&source_id, &target_id, relationship_type),
            source_id,
            target_id,
            relationship_type,
            direction: Direction::Directed,
            confidence: 1.0,
            strength: Strength::Strong,
            path: Vec::new(),
            evidence: None,
            discovered_at: Utc::now(),
        }
    }

    /// Identity used for deduplication
    pub fn key(source_id: &str, target_id: &str, relationship_type: RelationshipType) -> String {
        format!("{}|{}|{}", source_id, relationship_type.as_str(), target_id)
    }

    /// Set the confidence (clamped) and the matching strength bucket
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self.strength = Strength::from_confidence(self.confidence);
        self
    }

    /// Mark the relationship bidirectional
    pub fn bidirectional(mut self) -> Self {
        self.direction = Direction::Bidirectional;
        self
    }

    /// Attach the inferred path (entity ids, source first)
    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    /// Attach evidence text
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// Number of entities on the inferred path (0 for direct edges)
    pub fn path_length(&self) -> usize {
        self.path.len()
    }

    /// Whether this relationship was inferred rather than read from data
    pub fn is_inferred(&self) -> bool {
        !self.path.is_empty()
    }

    /// Check if this relationship is bidirectional
    pub fn is_bidirectional(&self) -> bool {
        self.direction == Direction::Bidirectional
    }

    /// Whether this relationship touches the entity
    pub fn involves(&self, entity_id: &str) -> bool {
        self.source_id == entity_id || self.target_id == entity_id
    }

    /// Deduplication identity
    pub fn dedup_key(&self) -> (String, String, RelationshipType) {
        (
            self.source_id.clone(),
            self.target_id.clone(),
            self.relationship_type,
        )
    }
}

/// Edge direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Directed,
    Bidirectional,
}

/// Coarse strength bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

impl Strength {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::Strong
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Weak
        }
    }
}

/// Types of relationships between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Source belongs to target (subscription -> customer)
    BelongsTo,
    /// Source manages target
    Manages,
    /// Source owns target
    Owns,
    /// Source is a member of target (person -> team)
    MemberOf,
    /// Source is assigned to target (ticket -> person)
    AssignedTo,
    /// Source affects target (risk -> customer)
    Affects,
    /// Source depends on target
    DependsOn,
    /// Source and target work together
    CollaboratesWith,
    /// Source happened before target
    Precedes,
    /// Source's activity drives target's activity
    Influences,
    /// Source and target activity move together
    CorrelatesWith,
    /// Source reaches target through intermediate entities
    ConnectedVia,
    /// Source cascades onto target through intermediate entities
    IndirectlyAffects,
}

impl RelationshipType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsTo => "BELONGS_TO",
            Self::Manages => "MANAGES",
            Self::Owns => "OWNS",
            Self::MemberOf => "MEMBER_OF",
            Self::AssignedTo => "ASSIGNED_TO",
            Self::Affects => "AFFECTS",
            Self::DependsOn => "DEPENDS_ON",
            Self::CollaboratesWith => "COLLABORATES_WITH",
            Self::Precedes => "PRECEDES",
            Self::Influences => "INFLUENCES",
            Self::CorrelatesWith => "CORRELATES_WITH",
            Self::ConnectedVia => "CONNECTED_VIA",
            Self::IndirectlyAffects => "INDIRECTLY_AFFECTS",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "BELONGS_TO" | "PART_OF" => Some(Self::BelongsTo),
            "MANAGES" => Some(Self::Manages),
            "OWNS" => Some(Self::Owns),
            "MEMBER_OF" => Some(Self::MemberOf),
            "ASSIGNED_TO" => Some(Self::AssignedTo),
            "AFFECTS" => Some(Self::Affects),
            "DEPENDS_ON" => Some(Self::DependsOn),
            "COLLABORATES_WITH" | "WORKS_WITH" => Some(Self::CollaboratesWith),
            "PRECEDES" => Some(Self::Precedes),
            "INFLUENCES" => Some(Self::Influences),
            "CORRELATES_WITH" => Some(Self::CorrelatesWith),
            "CONNECTED_VIA" => Some(Self::ConnectedVia),
            "INDIRECTLY_AFFECTS" => Some(Self::IndirectlyAffects),
            _ => None,
        }
    }

    /// Whether edges of this type indicate people working together
    pub fn is_collaborative(&self) -> bool {
        matches!(self, Self::CollaboratesWith | Self::MemberOf)
    }

    /// Whether this type is only ever produced by analysis
    pub fn is_discovered(&self) -> bool {
        matches!(
            self,
            Self::Precedes
                | Self::Influences
                | Self::CorrelatesWith
                | Self::ConnectedVia
                | Self::IndirectlyAffects
        )
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_creation() {
        let rel = Relationship::new("sub_1", "cust_1", RelationshipType::BelongsTo);

        assert_eq!(rel.id, "sub_1|BELONGS_TO|cust_1");
        assert_eq!(rel.confidence, 1.0);
        assert_eq!(rel.strength, Strength::Strong);
        assert!(!rel.is_inferred());
        assert!(rel.involves("cust_1"));
    }

    #[test]
    fn test_confidence_sets_strength() {
        let rel = Relationship::new("a", "b", RelationshipType::ConnectedVia).with_confidence(0.6);
        assert_eq!(rel.strength, Strength::Medium);

        let rel = rel.with_confidence(-1.0);
        assert_eq!(rel.confidence, 0.0);
        assert_eq!(rel.strength, Strength::Weak);
    }

    #[test]
    fn test_path_length() {
        let rel = Relationship::new("a", "c", RelationshipType::ConnectedVia)
            .with_path(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(rel.path_length(), 3);
        assert!(rel.is_inferred());
    }

    #[test]
    fn test_relationship_type_parsing() {
        assert_eq!(RelationshipType::parse("belongs_to"), Some(RelationshipType::BelongsTo));
        assert_eq!(RelationshipType::parse("works with"), Some(RelationshipType::CollaboratesWith));
        assert_eq!(RelationshipType::parse("unknown"), None);
        assert!(RelationshipType::CollaboratesWith.is_collaborative());
        assert!(RelationshipType::Precedes.is_discovered());
        assert!(!RelationshipType::Owns.is_discovered());
    }

    #[test]
    fn test_type_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&RelationshipType::IndirectlyAffects).unwrap(),
            "\"INDIRECTLY_AFFECTS\""
        );
    }
}
