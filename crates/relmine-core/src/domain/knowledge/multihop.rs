//! Multi-hop relationship discovery
//!
//! Infers indirect relationships between entities reachable only through
//! intermediates. Search is a depth-limited enumeration of simple directed
//! paths, kept tractable by `max_hops`, a per-source cap on targets and a
//! per-pair cap on paths. When a limit binds the result is simply smaller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{AnalysisCache, InMemoryCache};

use super::entity::{Entity, EntityType};
use super::graph::EntityGraph;
use super::relationship::{Relationship, RelationshipType};

/// Paths from `source_type` to any of `target_types` get `relationship_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeRule {
    pub source_type: EntityType,
    pub target_types: Vec<EntityType>,
    pub relationship_type: RelationshipType,
}

/// Discoverer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiHopConfig {
    pub max_hops: usize,
    pub max_targets_per_source: usize,
    pub max_paths_per_pair: usize,
    /// Paths scoring below this are discarded
    pub min_path_strength: f64,
    /// Score multiplier per edge beyond the first
    pub length_penalty: f64,
    /// An edge weaker than this fraction of its neighbours' mean is a bottleneck
    pub bottleneck_ratio: f64,
    /// Only pair entities sharing at least one non-null attribute
    pub require_shared_attribute: bool,
    pub cascade_rules: Vec<CascadeRule>,
}

impl Default for MultiHopConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            max_targets_per_source: 20,
            max_paths_per_pair: 10,
            min_path_strength: 0.3,
            length_penalty: 0.9,
            bottleneck_ratio: 0.5,
            require_shared_attribute: true,
            cascade_rules: vec![CascadeRule {
                source_type: EntityType::Risk,
                target_types: vec![EntityType::Customer, EntityType::Subscription],
                relationship_type: RelationshipType::IndirectlyAffects,
            }],
        }
    }
}

/// Scored candidate path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathAnalysis {
    /// Entity ids, source first
    pub nodes: Vec<String>,
    /// Confidence of each edge along the path
    pub edge_strengths: Vec<f64>,
    pub score: f64,
    /// Indices into `edge_strengths` of markedly weak edges
    pub bottlenecks: Vec<usize>,
}

impl PathAnalysis {
    pub fn hop_count(&self) -> usize {
        self.edge_strengths.len()
    }
}

/// Discovers indirect relationships via bounded path search
pub struct MultiHopRelationshipDiscoverer {
    config: MultiHopConfig,
    path_cache: Arc<dyn AnalysisCache<(String, String), Vec<String>>>,
}

impl MultiHopRelationshipDiscoverer {
    pub fn new() -> Self {
        Self::with_config(MultiHopConfig::default())
    }

    pub fn with_config(config: MultiHopConfig) -> Self {
        Self {
            config,
            path_cache: Arc::new(InMemoryCache::new()),
        }
    }

    /// Replace the path cache
    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache<(String, String), Vec<String>>>) -> Self {
        self.path_cache = cache;
        self
    }

    pub fn config(&self) -> &MultiHopConfig {
        &self.config
    }

    /// Discover indirect relationships
    ///
    /// `max_hops` overrides the configured bound for this call. Every
    /// returned relationship carries a path of at most `max_hops + 1`
    /// entities starting at its source and ending at its target.
    pub fn discover_multi_hop(
        &self,
        entities: &[Entity],
        direct_relationships: &[Relationship],
        max_hops: Option<usize>,
    ) -> Vec<Relationship> {
        let max_hops = max_hops.unwrap_or(self.config.max_hops);
        if entities.is_empty() || direct_relationships.is_empty() || max_hops < 2 {
            return Vec::new();
        }

        let graph = EntityGraph::build(entities, direct_relationships);
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
        let mut discovered = Vec::new();

        for source in graph.handles() {
            let paths_by_target = enumerate_paths(&graph, source, max_hops, self.config.max_paths_per_pair);
            if paths_by_target.is_empty() {
                continue;
            }

            let source_type = graph.entity_type(source);
            let mut targets: Vec<usize> = paths_by_target
                .keys()
                .copied()
                .filter(|&target| !graph.connected(source, target))
                .filter(|&target| {
                    !self.config.require_shared_attribute
                        || shares_attribute(by_id.get(graph.id(source)), by_id.get(graph.id(target)))
                })
                .collect();
            targets.sort_by_key(|&target| (graph.entity_type(target) == source_type, graph.id(target).to_string()));
            targets.truncate(self.config.max_targets_per_source);

            for target in targets {
                let Some(paths) = paths_by_target.get(&target) else {
                    continue;
                };
                let analyses: Vec<PathAnalysis> = paths
                    .iter()
                    .filter_map(|path| self.analyze_path(&graph, path))
                    .collect();

                let Some(best) = analyses.iter().max_by(|a, b| {
                    a.score
                        .total_cmp(&b.score)
                        .then(b.hop_count().cmp(&a.hop_count()))
                        .then(b.nodes.cmp(&a.nodes))
                }) else {
                    continue;
                };
                if best.score < self.config.min_path_strength {
                    debug!(
                        source = %graph.id(source),
                        target = %graph.id(target),
                        score = best.score,
                        "Path below minimum strength"
                    );
                    continue;
                }

                if let Some(shortest) = analyses
                    .iter()
                    .filter(|a| a.score >= self.config.min_path_strength)
                    .min_by(|a, b| a.hop_count().cmp(&b.hop_count()).then(b.score.total_cmp(&a.score)))
                {
                    self.path_cache.put(
                        (graph.id(source).to_string(), graph.id(target).to_string()),
                        shortest.nodes.clone(),
                    );
                }

                discovered.push(self.to_relationship(&graph, source, target, best));
            }
        }

        info!(
            entities = entities.len(),
            direct = direct_relationships.len(),
            discovered = discovered.len(),
            max_hops,
            "Discovered multi-hop relationships"
        );

        discovered
    }

    /// Shortest discovered path between two entities, if any
    pub fn get_path_between(&self, source_id: &str, target_id: &str) -> Option<Vec<String>> {
        self.path_cache
            .get(&(source_id.to_string(), target_id.to_string()))
    }

    /// Drop every cached path
    pub fn clear_cache(&self) {
        self.path_cache.clear();
    }

    /// Score a path of node handles
    ///
    /// Returns `None` for paths shorter than one edge or with a missing arc.
    pub fn analyze_path(&self, graph: &EntityGraph, path: &[usize]) -> Option<PathAnalysis> {
        if path.len() < 2 {
            return None;
        }
        let edge_strengths = path
            .windows(2)
            .map(|pair| graph.arc(pair[0], pair[1]).map(|edge| edge.confidence))
            .collect::<Option<Vec<f64>>>()?;

        let hops = edge_strengths.len();
        let score = geometric_mean(&edge_strengths) * self.config.length_penalty.powi(hops as i32 - 1);

        let bottlenecks = (0..hops)
            .filter(|&i| {
                let neighbours: Vec<f64> = [i.checked_sub(1), Some(i + 1)]
                    .into_iter()
                    .flatten()
                    .filter_map(|j| edge_strengths.get(j).copied())
                    .collect();
                if neighbours.is_empty() {
                    return false;
                }
                let mean = neighbours.iter().sum::<f64>() / neighbours.len() as f64;
                edge_strengths[i] < self.config.bottleneck_ratio * mean
            })
            .collect();

        Some(PathAnalysis {
            nodes: path.iter().map(|&h| graph.id(h).to_string()).collect(),
            edge_strengths,
            score: score.clamp(0.0, 1.0),
            bottlenecks,
        })
    }

    fn relationship_type(&self, source_type: EntityType, target_type: EntityType) -> RelationshipType {
        self.config
            .cascade_rules
            .iter()
            .find(|rule| rule.source_type == source_type && rule.target_types.contains(&target_type))
            .map_or(RelationshipType::ConnectedVia, |rule| rule.relationship_type)
    }

    fn to_relationship(&self, graph: &EntityGraph, source: usize, target: usize, analysis: &PathAnalysis) -> Relationship {
        let relationship_type = self.relationship_type(graph.entity_type(source), graph.entity_type(target));
        let intermediates = &analysis.nodes[1..analysis.nodes.len() - 1];

        let mut evidence = format!("{} hops via {}", analysis.hop_count(), intermediates.join(" -> "));
        for &i in &analysis.bottlenecks {
            evidence.push_str(&format!(
                "; weak link {} -> {} ({:.2})",
                analysis.nodes[i],
                analysis.nodes[i + 1],
                analysis.edge_strengths[i]
            ));
        }

        Relationship::new(graph.id(source), graph.id(target), relationship_type)
            .with_confidence(analysis.score)
            .with_path(analysis.nodes.clone())
            .with_evidence(evidence)
    }
}

impl Default for MultiHopRelationshipDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

/// All simple directed paths of 2..=max_hops edges from `source`, grouped
/// by endpoint; each endpoint keeps its `cap` shortest paths
fn enumerate_paths(
    graph: &EntityGraph,
    source: usize,
    max_hops: usize,
    cap: usize,
) -> BTreeMap<usize, Vec<Vec<usize>>> {
    let mut found: BTreeMap<usize, Vec<Vec<usize>>> = BTreeMap::new();
    let mut path = vec![source];
    let mut on_path = vec![false; graph.node_count()];
    on_path[source] = true;
    walk(graph, &mut path, &mut on_path, max_hops, &mut found);

    for paths in found.values_mut() {
        // stable, so equal-length paths keep discovery order
        paths.sort_by_key(Vec::len);
        paths.truncate(cap);
    }
    found
}

fn walk(
    graph: &EntityGraph,
    path: &mut Vec<usize>,
    on_path: &mut [bool],
    max_hops: usize,
    found: &mut BTreeMap<usize, Vec<Vec<usize>>>,
) {
    if path.len() > max_hops {
        return;
    }
    let Some(&current) = path.last() else {
        return;
    };

    for edge in graph.outgoing(current) {
        let next = edge.to;
        if on_path[next] {
            continue;
        }
        path.push(next);
        on_path[next] = true;

        if path.len() >= 3 {
            found.entry(next).or_default().push(path.clone());
        }
        walk(graph, path, on_path, max_hops, found);

        on_path[next] = false;
        path.pop();
    }
}

fn geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| *v <= 0.0) {
        return 0.0;
    }
    (values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64).exp()
}

fn shares_attribute(a: Option<&&Entity>, b: Option<&&Entity>) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };
    a.attributes
        .iter()
        .any(|(key, value)| key != "id" && !value.is_null() && b.attribute(key).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: &str, entity_type: EntityType) -> Entity {
        Entity::new(id, entity_type).with_attribute("name", id)
    }

    fn edge(a: &str, b: &str) -> Relationship {
        Relationship::new(a, b, RelationshipType::DependsOn)
    }

    #[test]
    fn test_customer_project_team() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        let entities = vec![
            named("c1", EntityType::Customer),
            named("p1", EntityType::Project),
            named("t1", EntityType::Team),
        ];
        let rels = vec![edge("c1", "p1"), edge("p1", "t1")];

        let found = discoverer.discover_multi_hop(&entities, &rels, Some(3));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_id, "c1");
        assert_eq!(found[0].target_id, "t1");
        assert_eq!(found[0].relationship_type, RelationshipType::ConnectedVia);
        assert_eq!(found[0].path_length(), 3);
        assert!((found[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_path_never_exceeds_bound() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        let ids = ["a", "b", "c", "d", "e", "f"];
        let entities: Vec<Entity> = ids.iter().map(|id| named(id, EntityType::Project)).collect();
        let rels: Vec<Relationship> = ids.windows(2).map(|w| edge(w[0], w[1])).collect();

        for k in 2..=5 {
            let found = discoverer.discover_multi_hop(&entities, &rels, Some(k));
            assert!(!found.is_empty());
            for rel in &found {
                assert!(rel.path_length() <= k + 1);
                assert_eq!(rel.path.first(), Some(&rel.source_id));
                assert_eq!(rel.path.last(), Some(&rel.target_id));
            }
        }
    }

    #[test]
    fn test_risk_cascade() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        let entities = vec![
            named("r1", EntityType::Risk),
            named("p1", EntityType::Project),
            named("c1", EntityType::Customer),
        ];
        let rels = vec![
            Relationship::new("r1", "p1", RelationshipType::Affects),
            Relationship::new("p1", "c1", RelationshipType::BelongsTo),
        ];

        let found = discoverer.discover_multi_hop(&entities, &rels, None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relationship_type, RelationshipType::IndirectlyAffects);
    }

    #[test]
    fn test_weak_paths_discarded() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        let entities = vec![named("a", EntityType::Person), named("b", EntityType::Team), named("c", EntityType::Project)];
        let rels = vec![edge("a", "b").with_confidence(0.2), edge("b", "c").with_confidence(0.2)];
        assert!(discoverer.discover_multi_hop(&entities, &rels, None).is_empty());
    }

    #[test]
    fn test_requires_shared_attribute() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        let entities = vec![
            Entity::new("a", EntityType::Person),
            Entity::new("b", EntityType::Team),
            Entity::new("c", EntityType::Project),
        ];
        let rels = vec![edge("a", "b"), edge("b", "c")];
        assert!(discoverer.discover_multi_hop(&entities, &rels, None).is_empty());

        let relaxed = MultiHopRelationshipDiscoverer::with_config(MultiHopConfig {
            require_shared_attribute: false,
            ..Default::default()
        });
        assert_eq!(relaxed.discover_multi_hop(&entities, &rels, None).len(), 1);
    }

    #[test]
    fn test_bottleneck_detection() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        let entities: Vec<Entity> = ["a", "b", "c", "d"].iter().map(|id| named(id, EntityType::Project)).collect();
        let rels = vec![
            edge("a", "b"),
            edge("b", "c").with_confidence(0.2),
            edge("c", "d"),
        ];
        let graph = EntityGraph::build(&entities, &rels);
        let path: Vec<usize> = ["a", "b", "c", "d"].iter().filter_map(|id| graph.handle(id)).collect();

        let analysis = discoverer.analyze_path(&graph, &path).unwrap();
        assert_eq!(analysis.bottlenecks, vec![1]);
        assert_eq!(analysis.hop_count(), 3);
        assert!(analysis.score < 0.9);
    }

    #[test]
    fn test_path_cache() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        assert!(discoverer.get_path_between("c1", "t1").is_none());

        let entities = vec![
            named("c1", EntityType::Customer),
            named("p1", EntityType::Project),
            named("t1", EntityType::Team),
        ];
        discoverer.discover_multi_hop(&entities, &[edge("c1", "p1"), edge("p1", "t1")], None);
        assert_eq!(
            discoverer.get_path_between("c1", "t1"),
            Some(vec!["c1".to_string(), "p1".to_string(), "t1".to_string()])
        );

        discoverer.clear_cache();
        assert!(discoverer.get_path_between("c1", "t1").is_none());
    }

    #[test]
    fn test_path_cap_keeps_shortest() {
        let discoverer = MultiHopRelationshipDiscoverer::with_config(MultiHopConfig {
            max_paths_per_pair: 1,
            ..Default::default()
        });
        let entities: Vec<Entity> = ["s", "a", "b", "c", "t"].iter().map(|id| named(id, EntityType::Project)).collect();
        // the three-hop route is walked first
        let rels = vec![edge("s", "a"), edge("a", "b"), edge("b", "t"), edge("s", "c"), edge("c", "t")];

        let discovered = discoverer.discover_multi_hop(&entities, &rels, None);
        let to_t = discovered
            .iter()
            .find(|r| r.source_id == "s" && r.target_id == "t")
            .unwrap();
        assert_eq!(to_t.path.len(), 3);
        assert_eq!(
            discoverer.get_path_between("s", "t"),
            Some(vec!["s".to_string(), "c".to_string(), "t".to_string()])
        );
    }

    #[test]
    fn test_empty_inputs() {
        let discoverer = MultiHopRelationshipDiscoverer::new();
        assert!(discoverer.discover_multi_hop(&[], &[], None).is_empty());
        assert!(discoverer.discover_multi_hop(&[named("a", EntityType::Team)], &[], None).is_empty());
    }
}
