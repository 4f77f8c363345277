//! Adjacency structure over resolved entities
//!
//! Nodes live in an arena indexed by dense `usize` handles; edges refer to
//! nodes by handle rather than by reference, so cyclic structures such as
//! collaboration triangles need no shared ownership and the graph stays
//! plain data.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::entity::{Entity, EntityType};
use super::relationship::{Relationship, RelationshipType};

/// Directed arc between two node handles
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    /// Highest confidence among relationships producing this arc
    pub confidence: f64,
    /// Type of the highest-confidence relationship
    pub relationship_type: RelationshipType,
    /// Any contributing relationship was collaboration-flavoured
    pub collaborative: bool,
}

/// Entity graph with outgoing and incoming adjacency lists
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    ids: Vec<String>,
    types: Vec<EntityType>,
    index: HashMap<String, usize>,
    outgoing: Vec<Vec<GraphEdge>>,
    incoming: Vec<Vec<GraphEdge>>,
}

impl EntityGraph {
    /// Build from entities and the relationships between them
    ///
    /// Relationships whose endpoints are not among `entities`, and
    /// self-loops, are skipped. Bidirectional relationships add both arcs;
    /// parallel relationships collapse into one arc per ordered pair.
    pub fn build(entities: &[Entity], relationships: &[Relationship]) -> Self {
        let mut graph = Self::default();

        for entity in entities {
            if graph.index.contains_key(&entity.id) {
                continue;
            }
            let handle = graph.ids.len();
            graph.ids.push(entity.id.clone());
            graph.types.push(entity.entity_type);
            graph.index.insert(entity.id.clone(), handle);
            graph.outgoing.push(Vec::new());
            graph.incoming.push(Vec::new());
        }

        for rel in relationships {
            let (Some(&from), Some(&to)) = (graph.index.get(&rel.source_id), graph.index.get(&rel.target_id))
            else {
                continue;
            };
            if from == to {
                continue;
            }
            graph.add_arc(from, to, rel);
            if rel.is_bidirectional() {
                graph.add_arc(to, from, rel);
            }
        }

        graph
    }

    fn add_arc(&mut self, from: usize, to: usize, rel: &Relationship) {
        let collaborative = rel.relationship_type.is_collaborative();
        if let Some(edge) = self.outgoing[from].iter_mut().find(|e| e.to == to) {
            edge.collaborative |= collaborative;
            if rel.confidence > edge.confidence {
                edge.confidence = rel.confidence;
                edge.relationship_type = rel.relationship_type;
            }
            let updated = edge.clone();
            if let Some(mirror) = self.incoming[to].iter_mut().find(|e| e.from == from) {
                *mirror = updated;
            }
            return;
        }

        let edge = GraphEdge {
            from,
            to,
            confidence: rel.confidence,
            relationship_type: rel.relationship_type,
            collaborative,
        };
        self.outgoing[from].push(edge.clone());
        self.incoming[to].push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Number of distinct directed arcs
    pub fn edge_count(&self) -> usize {
        self.outgoing.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn handle(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, handle: usize) -> &str {
        &self.ids[handle]
    }

    pub fn entity_type(&self, handle: usize) -> EntityType {
        self.types[handle]
    }

    pub fn outgoing(&self, handle: usize) -> &[GraphEdge] {
        &self.outgoing[handle]
    }

    pub fn incoming(&self, handle: usize) -> &[GraphEdge] {
        &self.incoming[handle]
    }

    /// The arc `from -> to`, if present
    pub fn arc(&self, from: usize, to: usize) -> Option<&GraphEdge> {
        self.outgoing[from].iter().find(|e| e.to == to)
    }

    /// Whether the two nodes share an arc in either direction
    pub fn connected(&self, a: usize, b: usize) -> bool {
        self.arc(a, b).is_some() || self.arc(b, a).is_some()
    }

    /// Neighbours ignoring direction
    pub fn undirected_neighbors(&self, handle: usize) -> BTreeSet<usize> {
        self.outgoing[handle]
            .iter()
            .map(|e| e.to)
            .chain(self.incoming[handle].iter().map(|e| e.from))
            .collect()
    }

    /// Undirected weighted adjacency: max arc confidence per unordered pair
    pub fn undirected_weights(&self) -> Vec<BTreeMap<usize, f64>> {
        let mut weights = vec![BTreeMap::new(); self.node_count()];
        for edges in &self.outgoing {
            for edge in edges {
                for (a, b) in [(edge.from, edge.to), (edge.to, edge.from)] {
                    let slot = weights[a].entry(b).or_insert(0.0);
                    if edge.confidence > *slot {
                        *slot = edge.confidence;
                    }
                }
            }
        }
        weights
    }

    /// Handles of all nodes
    pub fn handles(&self) -> std::ops::Range<usize> {
        0..self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities(ids: &[&str]) -> Vec<Entity> {
        ids.iter()
            .map(|id| Entity::new(*id, EntityType::Person))
            .collect()
    }

    #[test]
    fn test_build_skips_unknown_endpoints_and_self_loops() {
        let graph = EntityGraph::build(
            &entities(&["a", "b"]),
            &[
                Relationship::new("a", "b", RelationshipType::Manages),
                Relationship::new("a", "zzz", RelationshipType::Manages),
                Relationship::new("a", "a", RelationshipType::Manages),
            ],
        );

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_bidirectional_adds_both_arcs() {
        let graph = EntityGraph::build(
            &entities(&["a", "b"]),
            &[Relationship::new("a", "b", RelationshipType::CollaboratesWith).bidirectional()],
        );
        let a = graph.handle("a").unwrap();
        let b = graph.handle("b").unwrap();

        assert!(graph.arc(a, b).is_some());
        assert!(graph.arc(b, a).is_some());
        assert!(graph.arc(a, b).unwrap().collaborative);
    }

    #[test]
    fn test_parallel_relationships_collapse() {
        let graph = EntityGraph::build(
            &entities(&["a", "b"]),
            &[
                Relationship::new("a", "b", RelationshipType::Owns).with_confidence(0.4),
                Relationship::new("a", "b", RelationshipType::Manages).with_confidence(0.9),
            ],
        );
        let a = graph.handle("a").unwrap();
        let b = graph.handle("b").unwrap();
        let arc = graph.arc(a, b).unwrap();

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(arc.confidence, 0.9);
        assert_eq!(arc.relationship_type, RelationshipType::Manages);
        assert_eq!(graph.incoming(b)[0].confidence, 0.9);
    }

    #[test]
    fn test_undirected_views() {
        let graph = EntityGraph::build(
            &entities(&["a", "b", "c"]),
            &[
                Relationship::new("a", "b", RelationshipType::Owns).with_confidence(0.5),
                Relationship::new("c", "a", RelationshipType::Owns),
            ],
        );
        let a = graph.handle("a").unwrap();
        assert_eq!(graph.undirected_neighbors(a).len(), 2);

        let weights = graph.undirected_weights();
        let b = graph.handle("b").unwrap();
        assert_eq!(weights[b][&a], 0.5);
        assert!(graph.connected(a, b));
    }
}
