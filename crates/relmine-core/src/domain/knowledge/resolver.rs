//! Multi-source entity resolution
//!
//! Records describing the same real-world object arrive from several source
//! systems under different ids and slightly different spellings. The
//! resolver compares candidates pairwise, links matching pairs, and merges
//! each connected component into one canonical [`Entity`]. Resolution is
//! transitive: A~B and B~C merge all three even when A and C share no
//! signal directly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{AnalysisCache, InMemoryCache, fingerprint};
use crate::error::{Error, Result};

use super::entity::{Entity, EntityType};

/// How merged attributes are chosen when candidates disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Prefer the candidate with the most non-null fields
    #[default]
    MostComplete,
    /// Prefer the most recently extracted candidate
    MostRecent,
    /// Prefer the candidate from the most trusted source
    Weighted,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MostComplete => "most_complete",
            Self::MostRecent => "most_recent",
            Self::Weighted => "weighted",
        }
    }

    /// Parse a strategy name, failing on anything unknown
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "most_complete" => Ok(Self::MostComplete),
            "most_recent" => Ok(Self::MostRecent),
            "weighted" => Ok(Self::Weighted),
            _ => Err(Error::UnknownMergeStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum name similarity (0.0 to 1.0) for a fuzzy name match
    pub similarity_threshold: f64,
    /// One of `most_complete`, `most_recent`, `weighted`
    pub merge_strategy: String,
    /// Trust per source system, used by the weighted strategy
    pub source_weights: BTreeMap<String, f64>,
    /// Trust for sources missing from `source_weights`
    pub default_source_weight: f64,
    /// Attributes holding another system's id for the same object
    pub cross_reference_fields: Vec<String>,
    /// Attributes tried in order for the display name
    pub name_fields: Vec<String>,
    /// Email domains too common to identify an organisation
    pub free_email_domains: Vec<String>,
    /// Types for which a shared web or email domain is a match signal
    pub domain_match_types: Vec<EntityType>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            merge_strategy: MergeStrategy::MostComplete.as_str().to_string(),
            source_weights: BTreeMap::new(),
            default_source_weight: 0.5,
            cross_reference_fields: ["external_id", "duplicate_of", "same_as", "crm_id", "billing_id", "support_id"]
                .into_iter()
                .map(String::from)
                .collect(),
            name_fields: ["name", "company_name", "full_name"]
                .into_iter()
                .map(String::from)
                .collect(),
            free_email_domains: ["gmail.com", "yahoo.com", "hotmail.com", "outlook.com", "icloud.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            domain_match_types: vec![EntityType::Customer],
        }
    }
}

/// Evidence that two candidates describe the same object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    CrossReference,
    Email,
    Domain,
    Name,
}

impl MatchSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossReference => "cross_reference",
            Self::Email => "email",
            Self::Domain => "domain",
            Self::Name => "name",
        }
    }
}

/// One merged component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeGroup {
    pub canonical_id: String,
    /// Ids of every candidate folded into the canonical entity
    pub merged_ids: Vec<String>,
    pub signals: BTreeSet<MatchSignal>,
}

/// Resolved entities plus an audit of what was merged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub entities: Vec<Entity>,
    pub groups: Vec<MergeGroup>,
}

/// Deduplicates and merges entities across source systems
pub struct MultiSourceEntityResolver {
    config: ResolutionConfig,
    strategy: MergeStrategy,
    cache: Arc<dyn AnalysisCache<String, ResolutionReport>>,
}

impl MultiSourceEntityResolver {
    /// Create a resolver with default settings
    pub fn new() -> Self {
        Self {
            config: ResolutionConfig::default(),
            strategy: MergeStrategy::default(),
            cache: Arc::new(InMemoryCache::new()),
        }
    }

    /// Create a resolver from configuration
    ///
    /// Fails when the merge strategy name is unknown.
    pub fn with_config(config: ResolutionConfig) -> Result<Self> {
        let strategy = MergeStrategy::parse(&config.merge_strategy)?;
        Ok(Self {
            config,
            strategy,
            cache: Arc::new(InMemoryCache::new()),
        })
    }

    /// Replace the resolution cache
    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache<String, ResolutionReport>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Resolve entities into one canonical entity per real-world object
    ///
    /// With `group_by_type` entities of different declared types are never
    /// merged. Output is sorted by id.
    pub fn resolve_entities(&self, entities: &[Entity], group_by_type: bool) -> Vec<Entity> {
        if entities.len() <= 1 {
            return entities.to_vec();
        }
        self.resolve_with_report(entities, group_by_type).entities
    }

    /// Resolve and report which candidates were merged, and why
    pub fn resolve_with_report(&self, entities: &[Entity], group_by_type: bool) -> ResolutionReport {
        if entities.is_empty() {
            return ResolutionReport::default();
        }

        let key = self.cache_key(entities, group_by_type);
        if let Some(report) = key.as_ref().and_then(|k| self.cache.get(k)) {
            debug!(entities = entities.len(), "Resolution served from cache");
            return report;
        }

        let report = self.resolve_uncached(entities, group_by_type);

        info!(
            input = entities.len(),
            output = report.entities.len(),
            merged_groups = report.groups.len(),
            strategy = %self.strategy,
            "Resolved entities"
        );

        if let Some(key) = key {
            self.cache.put(key, report.clone());
        }
        report
    }

    /// Drop every cached resolution
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn cache_key(&self, entities: &[Entity], group_by_type: bool) -> Option<String> {
        let mut parts = Vec::with_capacity(entities.len() + 2);
        parts.push(format!("group_by_type={}", group_by_type));
        parts.push(self.strategy.as_str().to_string());
        for entity in entities {
            parts.push(serde_json::to_string(entity).ok()?);
        }
        Some(fingerprint(parts))
    }

    fn resolve_uncached(&self, entities: &[Entity], group_by_type: bool) -> ResolutionReport {
        let mut partitions: BTreeMap<Option<EntityType>, Vec<usize>> = BTreeMap::new();
        for (i, entity) in entities.iter().enumerate() {
            let key = group_by_type.then_some(entity.entity_type);
            partitions.entry(key).or_default().push(i);
        }

        let profiles: Vec<MatchProfile> = entities.iter().map(|e| self.profile(e)).collect();
        let mut components = UnionFind::new(entities.len());
        let mut pair_signals: Vec<(usize, usize, BTreeSet<MatchSignal>)> = Vec::new();

        for members in partitions.values() {
            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    let signals = self.match_signals(&entities[i], &profiles[i], &entities[j], &profiles[j]);
                    if !signals.is_empty() {
                        debug!(
                            left = %entities[i].id,
                            right = %entities[j].id,
                            signals = ?signals,
                            "Candidates matched"
                        );
                        components.union(i, j);
                        pair_signals.push((i, j, signals));
                    }
                }
            }
        }

        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..entities.len() {
            by_root.entry(components.find(i)).or_default().push(i);
        }

        let mut resolved = Vec::with_capacity(by_root.len());
        let mut groups = Vec::new();

        for (root, members) in by_root {
            if members.len() == 1 {
                resolved.push(entities[members[0]].clone());
                continue;
            }

            let candidates: Vec<&Entity> = members.iter().map(|&i| &entities[i]).collect();
            let merged = self.merge(&candidates);

            let signals = pair_signals
                .iter()
                .filter(|(i, _, _)| components.find(*i) == root)
                .flat_map(|(_, _, s)| s.iter().copied())
                .collect();
            let mut merged_ids: Vec<String> = candidates.iter().map(|e| e.id.clone()).collect();
            merged_ids.sort();

            groups.push(MergeGroup {
                canonical_id: merged.id.clone(),
                merged_ids,
                signals,
            });
            resolved.push(merged);
        }

        resolved.sort_by(|a, b| a.id.cmp(&b.id).then(a.entity_type.cmp(&b.entity_type)));
        groups.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));

        ResolutionReport {
            entities: resolved,
            groups,
        }
    }

    fn profile(&self, entity: &Entity) -> MatchProfile {
        let email = entity
            .attribute_str("email")
            .map(|e| e.to_lowercase())
            .filter(|e| e.contains('@'));

        let mut domains = BTreeSet::new();
        if self.config.domain_match_types.contains(&entity.entity_type) {
            let from_email = email.as_deref().and_then(|e| e.rsplit('@').next()).map(str::to_string);
            let from_site = entity.attribute_str("website").and_then(website_domain);
            for domain in from_email.into_iter().chain(from_site) {
                if !domain.is_empty() && !self.config.free_email_domains.contains(&domain) {
                    domains.insert(domain);
                }
            }
        }

        let name = self
            .config
            .name_fields
            .iter()
            .find_map(|field| entity.attribute_str(field))
            .map(NameForms::new);

        MatchProfile { email, domains, name }
    }

    fn match_signals(
        &self,
        a: &Entity,
        a_profile: &MatchProfile,
        b: &Entity,
        b_profile: &MatchProfile,
    ) -> BTreeSet<MatchSignal> {
        let mut signals = BTreeSet::new();

        if self.references(a, b) || self.references(b, a) {
            signals.insert(MatchSignal::CrossReference);
        }
        if let (Some(x), Some(y)) = (&a_profile.email, &b_profile.email) {
            if x == y {
                signals.insert(MatchSignal::Email);
            }
        }
        if !a_profile.domains.is_disjoint(&b_profile.domains) {
            signals.insert(MatchSignal::Domain);
        }
        if let (Some(x), Some(y)) = (&a_profile.name, &b_profile.name) {
            if x.similarity(y) >= self.config.similarity_threshold {
                signals.insert(MatchSignal::Name);
            }
        }

        signals
    }

    /// Whether `from` holds a cross-reference to `to`
    fn references(&self, from: &Entity, to: &Entity) -> bool {
        from.attributes.keys().any(|key| {
            let is_reference = self.config.cross_reference_fields.contains(key)
                || to.source_ids.keys().any(|source| *key == format!("{}_id", source));
            if !is_reference {
                return false;
            }
            from.attribute_text(key)
                .is_some_and(|value| value == to.id || to.source_ids.values().any(|id| *id == value))
        })
    }

    fn merge(&self, candidates: &[&Entity]) -> Entity {
        let mut ranked = candidates.to_vec();
        ranked.sort_by(|a, b| {
            let primary = match self.strategy {
                MergeStrategy::MostComplete => b.completeness().cmp(&a.completeness()),
                MergeStrategy::MostRecent => b.extracted_at.cmp(&a.extracted_at),
                MergeStrategy::Weighted => self.source_weight(b).total_cmp(&self.source_weight(a)),
            };
            primary
                .then(b.completeness().cmp(&a.completeness()))
                .then(a.id.cmp(&b.id))
                .then(a.source.cmp(&b.source))
        });

        let mut merged = ranked[0].clone();
        for other in &ranked[1..] {
            for (key, value) in &other.attributes {
                if value.is_null() {
                    continue;
                }
                let slot = merged.attributes.entry(key.clone()).or_insert(serde_json::Value::Null);
                if slot.is_null() {
                    *slot = value.clone();
                }
            }
        }

        for candidate in &ranked {
            for (source, id) in &candidate.source_ids {
                merged.source_ids.entry(source.clone()).or_insert_with(|| id.clone());
            }
            if let Some(source) = &candidate.source {
                merged
                    .source_ids
                    .entry(source.clone())
                    .or_insert_with(|| candidate.id.clone());
            }
            merged.confidence = merged.confidence.max(candidate.confidence);
            merged.extracted_at = merged.extracted_at.max(candidate.extracted_at);
        }

        merged
    }

    fn source_weight(&self, entity: &Entity) -> f64 {
        entity
            .source
            .as_ref()
            .and_then(|s| self.config.source_weights.get(s))
            .copied()
            .unwrap_or(self.config.default_source_weight)
    }
}

impl Default for MultiSourceEntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

struct MatchProfile {
    email: Option<String>,
    domains: BTreeSet<String>,
    name: Option<NameForms>,
}

/// Normalized spellings of one name
struct NameForms {
    full: String,
    stripped: String,
}

const COMPANY_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "llc",
    "ltd",
    "limited",
    "co",
    "company",
    "group",
    "gmbh",
    "plc",
];

impl NameForms {
    fn new(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut kept = tokens.clone();
        while kept.len() > 1 && kept.last().is_some_and(|t| COMPANY_SUFFIXES.contains(t)) {
            kept.pop();
        }

        Self {
            full: tokens.join(" "),
            stripped: kept.join(" "),
        }
    }

    /// Best ratio over spaced and compact forms, with and without suffixes
    fn similarity(&self, other: &NameForms) -> f64 {
        if self.full.is_empty() || other.full.is_empty() {
            return 0.0;
        }
        [(&self.full, &other.full), (&self.stripped, &other.stripped)]
            .into_iter()
            .flat_map(|(a, b)| [similarity_ratio(a, b), similarity_ratio(&a.replace(' ', ""), &b.replace(' ', ""))])
            .fold(0.0, f64::max)
    }
}

/// Normalized Levenshtein similarity in [0, 1]
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len() + 1];

    for (i, a_char) in a.chars().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let cost = usize::from(a_char != *b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1).min(curr_row[j] + 1).min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

fn website_domain(url: &str) -> Option<String> {
    let lowered = url.trim().to_lowercase();
    let without_scheme = lowered.split_once("://").map_or(lowered.as_str(), |(_, rest)| rest);
    let host = without_scheme.split(['/', ':', '?', '#']).next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.contains('.').then(|| host.to_string())
}

/// Disjoint-set forest with path halving
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // smaller root wins so roots follow input order
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}
