//! Graph pattern recognition
//!
//! Detects recurring structural motifs in the relationship graph. Each
//! detector reads the shared [`EntityGraph`] and returns its own list, so
//! with `parallel_detection` they run on scoped threads without locking.
//! Patterns are recomputed from scratch on every run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::cache::{AnalysisCache, InMemoryCache, fingerprint};

use super::community::CommunityDetector;
use super::entity::Entity;
use super::graph::EntityGraph;
use super::relationship::Relationship;

/// Kind of structural motif
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Hub,
    Star,
    Triangle,
    Chain,
    Community,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::Star => "star",
            Self::Triangle => "triangle",
            Self::Chain => "chain",
            Self::Community => "community",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pattern metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    /// Roughly 0.0 to 2.0
    pub importance_score: f64,
    pub spoke_count: Option<usize>,
    pub chain_length: Option<usize>,
    /// Distinct connected member pairs
    pub edge_count: usize,
    /// Connected pairs over possible pairs
    pub density: f64,
    pub average_confidence: f64,
    pub indicates_collaboration: bool,
    pub collaboration_strength: f64,
    pub community_id: Option<usize>,
}

/// A detected motif
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPattern {
    pub pattern_type: PatternType,
    /// Member entity ids; hub and star patterns list the centre first
    pub members: Vec<String>,
    /// Per-member centrality, hub and star patterns only
    pub centrality_scores: BTreeMap<String, f64>,
    pub metadata: PatternMetadata,
}

impl GraphPattern {
    /// Triangle whose edges are mostly collaboration ties
    pub fn is_collaboration_pattern(&self) -> bool {
        self.pattern_type == PatternType::Triangle && self.metadata.indicates_collaboration
    }

    /// Centre of a hub or star pattern
    pub fn center(&self) -> Option<&str> {
        match self.pattern_type {
            PatternType::Hub | PatternType::Star => self.members.first().map(String::as_str),
            _ => None,
        }
    }
}

/// Strategy combining size, confidence and collaboration into importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceScoring {
    #[default]
    Balanced,
    SizeWeighted,
    ConfidenceWeighted,
}

impl ImportanceScoring {
    /// Importance in 0.0..=2.0
    pub fn score(&self, size: usize, average_confidence: f64, collaboration_strength: f64) -> f64 {
        let size_factor = (size as f64 / 10.0).min(1.0);
        let confidence = average_confidence.clamp(0.0, 1.0);
        let collaboration = collaboration_strength.clamp(0.0, 1.0);

        let (ws, wc, wk) = match self {
            Self::Balanced => (0.5, 1.0, 0.5),
            Self::SizeWeighted => (1.0, 0.5, 0.5),
            Self::ConfidenceWeighted => (0.25, 1.5, 0.25),
        };
        (ws * size_factor + wc * confidence + wk * collaboration).clamp(0.0, 2.0)
    }
}

/// Recognizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_connections: usize,
    pub min_spokes: usize,
    pub min_chain_length: usize,
    /// Share of a node's arcs that must point the same way for hub/star
    pub direction_ratio: f64,
    /// A triad with this many mutually linked pairs is a triangle even when open
    pub min_mutual_edges: usize,
    pub min_community_size: usize,
    pub community_seed: u64,
    pub community_resolution: f64,
    pub parallel_detection: bool,
    pub importance_scoring: ImportanceScoring,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_connections: 3,
            min_spokes: 3,
            min_chain_length: 3,
            direction_ratio: 0.6,
            min_mutual_edges: 2,
            min_community_size: 3,
            community_seed: 42,
            community_resolution: 1.0,
            parallel_detection: true,
            importance_scoring: ImportanceScoring::Balanced,
        }
    }
}

type Detector = fn(&EntityGraph, &PatternConfig) -> Vec<GraphPattern>;

const DETECTORS: [(PatternType, Detector); 5] = [
    (PatternType::Hub, detect_hubs),
    (PatternType::Star, detect_stars),
    (PatternType::Triangle, detect_triangles),
    (PatternType::Chain, detect_chains),
    (PatternType::Community, detect_communities),
];

/// Detects hub, star, triangle, chain and community motifs
pub struct GraphPatternRecognizer {
    config: PatternConfig,
    cache: Arc<dyn AnalysisCache<String, Vec<GraphPattern>>>,
}

impl GraphPatternRecognizer {
    pub fn new() -> Self {
        Self::with_config(PatternConfig::default())
    }

    pub fn with_config(config: PatternConfig) -> Self {
        Self {
            config,
            cache: Arc::new(InMemoryCache::new()),
        }
    }

    /// Replace the pattern cache
    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache<String, Vec<GraphPattern>>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Recognise patterns, most important first
    pub fn recognize_patterns(&self, entities: &[Entity], relationships: &[Relationship]) -> Vec<GraphPattern> {
        if entities.is_empty() || relationships.is_empty() {
            return Vec::new();
        }

        let key = self.cache_key(entities, relationships);
        if let Some(patterns) = self.cache.get(&key) {
            debug!(patterns = patterns.len(), "Patterns served from cache");
            return patterns;
        }

        let graph = EntityGraph::build(entities, relationships);
        let mut patterns: Vec<GraphPattern> = if self.config.parallel_detection {
            detect_parallel(&graph, &self.config, &DETECTORS)
        } else {
            DETECTORS
                .iter()
                .flat_map(|(_, detect)| detect(&graph, &self.config))
                .collect()
        };

        patterns.sort_by(|a, b| {
            b.metadata
                .importance_score
                .total_cmp(&a.metadata.importance_score)
                .then(a.pattern_type.cmp(&b.pattern_type))
                .then_with(|| a.members.cmp(&b.members))
        });

        let counts = DETECTORS.map(|(kind, _)| patterns.iter().filter(|p| p.pattern_type == kind).count());
        info!(
            nodes = graph.node_count(),
            arcs = graph.edge_count(),
            hubs = counts[0],
            stars = counts[1],
            triangles = counts[2],
            chains = counts[3],
            communities = counts[4],
            parallel = self.config.parallel_detection,
            "Recognised graph patterns"
        );

        self.cache.put(key, patterns.clone());
        patterns
    }

    /// Drop every cached result
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn cache_key(&self, entities: &[Entity], relationships: &[Relationship]) -> String {
        let mut parts: Vec<String> = vec![format!("{:?}", self.config)];
        parts.extend(entities.iter().map(|e| format!("{}:{}", e.entity_type, e.id)));
        parts.extend(relationships.iter().map(|r| {
            format!(
                "{}|{}|{}|{:?}|{}",
                r.source_id, r.relationship_type, r.target_id, r.direction, r.confidence
            )
        }));
        fingerprint(parts)
    }
}

impl Default for GraphPatternRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Run every detector on its own scoped thread
///
/// A panicking detector is re-raised on the caller, as it would be serially.
fn detect_parallel(graph: &EntityGraph, config: &PatternConfig, detectors: &[(PatternType, Detector)]) -> Vec<GraphPattern> {
    std::thread::scope(|s| {
        let handles: Vec<_> = detectors
            .iter()
            .map(|&(kind, detect)| (kind, s.spawn(move || detect(graph, config))))
            .collect();

        handles
            .into_iter()
            .flat_map(|(kind, handle)| {
                handle.join().unwrap_or_else(|payload| {
                    error!(pattern_type = %kind, "Pattern detector panicked");
                    std::panic::resume_unwind(payload)
                })
            })
            .collect()
    })
}

/// Statistics over the connected pairs among `members`
struct PairStats {
    edge_count: usize,
    density: f64,
    average_confidence: f64,
    collaborative_edges: usize,
    collaboration_strength: f64,
}

fn pair_stats(graph: &EntityGraph, members: &[usize]) -> PairStats {
    let mut edge_count = 0;
    let mut confidence_sum = 0.0;
    let mut collaborative_edges = 0;
    let mut collaborative_confidence = 0.0;

    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            let arcs: Vec<_> = [graph.arc(a, b), graph.arc(b, a)].into_iter().flatten().collect();
            if arcs.is_empty() {
                continue;
            }
            let confidence = arcs.iter().map(|e| e.confidence).fold(0.0, f64::max);
            edge_count += 1;
            confidence_sum += confidence;
            if arcs.iter().any(|e| e.collaborative) {
                collaborative_edges += 1;
                collaborative_confidence += confidence;
            }
        }
    }

    let possible = members.len() * members.len().saturating_sub(1) / 2;
    PairStats {
        edge_count,
        density: if possible == 0 {
            0.0
        } else {
            edge_count as f64 / possible as f64
        },
        average_confidence: if edge_count == 0 {
            0.0
        } else {
            confidence_sum / edge_count as f64
        },
        collaborative_edges,
        collaboration_strength: if edge_count == 0 {
            0.0
        } else {
            collaborative_confidence / edge_count as f64
        },
    }
}

/// Normalized degree / weighted-degree centrality inside the member set
fn member_centrality(graph: &EntityGraph, members: &[usize]) -> BTreeMap<String, f64> {
    let weights = graph.undirected_weights();
    let set: BTreeSet<usize> = members.iter().copied().collect();
    let scale = members.len().saturating_sub(1).max(1) as f64;

    let raw: Vec<(usize, f64, f64)> = members
        .iter()
        .map(|&m| {
            let inside = weights[m].iter().filter(|(n, _)| set.contains(*n));
            let (degree, weighted) = inside.fold((0usize, 0.0), |(d, w), (_, x)| (d + 1, w + x));
            (m, degree as f64 / scale, weighted)
        })
        .collect();
    let max_weighted = raw.iter().map(|r| r.2).fold(0.0, f64::max);

    raw.into_iter()
        .map(|(m, degree, weighted)| {
            let weighted = if max_weighted > 0.0 { weighted / max_weighted } else { 0.0 };
            (graph.id(m).to_string(), 0.5 * degree + 0.5 * weighted)
        })
        .collect()
}

fn build_pattern(
    graph: &EntityGraph,
    config: &PatternConfig,
    pattern_type: PatternType,
    members: Vec<usize>,
    with_centrality: bool,
) -> GraphPattern {
    let stats = pair_stats(graph, &members);
    let collaboration = if pattern_type == PatternType::Triangle {
        stats.collaboration_strength
    } else {
        0.0
    };

    GraphPattern {
        pattern_type,
        centrality_scores: if with_centrality {
            member_centrality(graph, &members)
        } else {
            BTreeMap::new()
        },
        metadata: PatternMetadata {
            importance_score: config
                .importance_scoring
                .score(members.len(), stats.average_confidence, collaboration),
            edge_count: stats.edge_count,
            density: stats.density,
            average_confidence: stats.average_confidence,
            collaboration_strength: collaboration,
            ..Default::default()
        },
        members: members.iter().map(|&m| graph.id(m).to_string()).collect(),
    }
}

/// Centre plus its neighbours on the predominant side
///
/// A neighbour linked both ways is one undirected spoke: it counts once,
/// towards the outbound (star) side.
fn directional_centre(
    graph: &EntityGraph,
    config: &PatternConfig,
    node: usize,
    inbound: bool,
    minimum: usize,
) -> Option<Vec<usize>> {
    let sources: BTreeSet<usize> = graph.incoming(node).iter().map(|e| e.from).collect();
    let targets: BTreeSet<usize> = graph.outgoing(node).iter().map(|e| e.to).collect();
    let total = sources.union(&targets).count();

    let mut spokes: Vec<usize> = if inbound {
        sources.difference(&targets).copied().collect()
    } else {
        targets.into_iter().collect()
    };
    if spokes.len() < minimum || total == 0 || (spokes.len() as f64 / total as f64) < config.direction_ratio {
        return None;
    }
    spokes.sort_by(|a, b| graph.id(*a).cmp(graph.id(*b)));

    let mut members = vec![node];
    members.extend(spokes);
    Some(members)
}

fn detect_hubs(graph: &EntityGraph, config: &PatternConfig) -> Vec<GraphPattern> {
    graph
        .handles()
        .filter_map(|node| directional_centre(graph, config, node, true, config.min_connections))
        .map(|members| build_pattern(graph, config, PatternType::Hub, members, true))
        .collect()
}

fn detect_stars(graph: &EntityGraph, config: &PatternConfig) -> Vec<GraphPattern> {
    graph
        .handles()
        .filter_map(|node| directional_centre(graph, config, node, false, config.min_spokes))
        .map(|members| {
            let spokes = members.len() - 1;
            let mut pattern = build_pattern(graph, config, PatternType::Star, members, true);
            pattern.metadata.spoke_count = Some(spokes);
            pattern
        })
        .collect()
}

/// Closed triads, plus open triads whose ties are mostly mutual
fn detect_triangles(graph: &EntityGraph, config: &PatternConfig) -> Vec<GraphPattern> {
    let mut triads: BTreeSet<[usize; 3]> = BTreeSet::new();

    for middle in graph.handles() {
        let neighbours: Vec<usize> = graph.undirected_neighbors(middle).into_iter().collect();
        for (i, &a) in neighbours.iter().enumerate() {
            for &b in &neighbours[i + 1..] {
                let mut triad = [middle, a, b];
                triad.sort_unstable();
                if triads.contains(&triad) {
                    continue;
                }

                let pairs = [(triad[0], triad[1]), (triad[0], triad[2]), (triad[1], triad[2])];
                let connected = pairs.iter().filter(|(x, y)| graph.connected(*x, *y)).count();
                let mutual = pairs
                    .iter()
                    .filter(|(x, y)| graph.arc(*x, *y).is_some() && graph.arc(*y, *x).is_some())
                    .count();

                if connected == 3 || mutual >= config.min_mutual_edges {
                    triads.insert(triad);
                }
            }
        }
    }

    triads
        .into_iter()
        .map(|triad| {
            let mut members = triad.to_vec();
            members.sort_by(|a, b| graph.id(*a).cmp(graph.id(*b)));
            let collaborative = pair_stats(graph, &members).collaborative_edges;
            let mut pattern = build_pattern(graph, config, PatternType::Triangle, members, false);
            pattern.metadata.indicates_collaboration = collaborative >= 2;
            if !pattern.metadata.indicates_collaboration {
                pattern.metadata.collaboration_strength = 0.0;
                pattern.metadata.importance_score =
                    config
                        .importance_scoring
                        .score(3, pattern.metadata.average_confidence, 0.0);
            }
            pattern
        })
        .collect()
}

/// Maximal unbranched directed paths
fn detect_chains(graph: &EntityGraph, config: &PatternConfig) -> Vec<GraphPattern> {
    // u -> v continues a chain when u has one way out and v one way in
    let link = |u: usize| -> Option<usize> {
        let out = graph.outgoing(u);
        (out.len() == 1 && graph.incoming(out[0].to).len() == 1).then(|| out[0].to)
    };
    let continues_from_predecessor = |u: usize| {
        let inward = graph.incoming(u);
        inward.len() == 1 && link(inward[0].from) == Some(u)
    };

    let mut chains = Vec::new();
    for start in graph.handles() {
        if link(start).is_none() || continues_from_predecessor(start) {
            continue;
        }

        let mut members = vec![start];
        let mut seen: BTreeSet<usize> = BTreeSet::from([start]);
        let mut current = start;
        while let Some(next) = link(current) {
            if !seen.insert(next) {
                break;
            }
            members.push(next);
            current = next;
        }

        if members.len() >= config.min_chain_length {
            let length = members.len();
            let mut pattern = build_pattern(graph, config, PatternType::Chain, members, false);
            pattern.metadata.chain_length = Some(length);
            chains.push(pattern);
        }
    }
    chains
}

/// Reported only when at least two communities reach the minimum size
fn detect_communities(graph: &EntityGraph, config: &PatternConfig) -> Vec<GraphPattern> {
    let labels = CommunityDetector::new(config.community_seed)
        .with_resolution(config.community_resolution)
        .detect(&graph.undirected_weights());

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, label) in labels.into_iter().enumerate() {
        groups.entry(label).or_default().push(node);
    }
    let qualifying: Vec<(usize, Vec<usize>)> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= config.min_community_size)
        .collect();
    if qualifying.len() < 2 {
        return Vec::new();
    }

    qualifying
        .into_iter()
        .map(|(label, mut members)| {
            members.sort_by(|a, b| graph.id(*a).cmp(graph.id(*b)));
            let mut pattern = build_pattern(graph, config, PatternType::Community, members, false);
            pattern.metadata.community_id = Some(label);
            pattern
        })
        .collect()
}
