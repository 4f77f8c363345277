//! Temporal relationship analysis
//!
//! Events are bucketed into one value per entity per day, gaps filled per
//! configuration. All event types of an entity share its series, and
//! non-finite values are dropped. Every pair of sufficiently active entities is
//! compared: Pearson correlation over the overlapping range, a bounded
//! cross-correlation lag search, and a lagged-regression causality score.
//!
//! Causality compares two regressions of the follower series `y`:
//!
//! * restricted: `y[t] ~ y[t-1]`
//! * full: `y[t] ~ y[t-1] + x[t-lag]`
//!
//! `gain = (R²full - R²restricted) / (1 - R²restricted)` and
//! `causality = |r_lag| * (0.5 + 0.5 * gain)`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{AnalysisCache, InMemoryCache};

use super::entity::Entity;
use super::relationship::{Relationship, RelationshipType};

/// A time-stamped, valued event attached to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl EntityEvent {
    pub fn new(
        entity_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            event_type: event_type.into(),
            timestamp,
            value,
        }
    }
}

/// How days without events are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    #[default]
    Zero,
    ForwardFill,
    Linear,
}

/// Correlation between two entities' daily series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCorrelation {
    pub entity1: String,
    pub entity2: String,
    /// Pearson correlation at lag 0, in [-1, 1]
    pub correlation_coefficient: f64,
    pub optimal_lag_days: u32,
    /// Correlation at the optimal lag
    pub lagged_correlation: f64,
    /// Entity whose series leads, when the optimal lag is non-zero
    pub leader: Option<String>,
    pub causality_score: f64,
    pub confidence: f64,
    /// Day pairs behind the lagged correlation
    pub sample_size: usize,
}

impl TemporalCorrelation {
    /// `(leader, follower)` when the series are offset in time
    pub fn direction(&self) -> Option<(&str, &str)> {
        let leader = self.leader.as_deref()?;
        let follower = if leader == self.entity1 { &self.entity2 } else { &self.entity1 };
        Some((leader, follower))
    }
}

/// A window holding markedly more events than the average rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCluster {
    pub center: DateTime<Utc>,
    pub events: Vec<EntityEvent>,
}

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub min_events_per_entity: usize,
    pub max_lag_days: u32,
    pub min_correlation: f64,
    pub causal_threshold: f64,
    pub gap_fill: GapFill,
    /// Minimum day pairs for a correlation to count
    pub min_overlap_days: usize,
    /// Day pairs at which confidence stops growing
    pub full_confidence_samples: usize,
    /// A cluster window holds at least this multiple of the average rate
    pub cluster_density_factor: f64,
    pub min_cluster_size: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            min_events_per_entity: 5,
            max_lag_days: 14,
            min_correlation: 0.5,
            causal_threshold: 0.6,
            gap_fill: GapFill::Zero,
            min_overlap_days: 5,
            full_confidence_samples: 30,
            cluster_density_factor: 2.0,
            min_cluster_size: 3,
        }
    }
}

/// Relationships plus the correlations behind them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalAnalysis {
    pub relationships: Vec<Relationship>,
    pub correlations: Vec<TemporalCorrelation>,
}

/// Correlates event time series between entity pairs
pub struct TemporalRelationshipAnalyzer {
    config: TemporalConfig,
    cache: Arc<dyn AnalysisCache<(String, String), TemporalCorrelation>>,
}

impl TemporalRelationshipAnalyzer {
    pub fn new() -> Self {
        Self::with_config(TemporalConfig::default())
    }

    pub fn with_config(config: TemporalConfig) -> Self {
        Self {
            config,
            cache: Arc::new(InMemoryCache::new()),
        }
    }

    /// Replace the correlation cache
    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache<(String, String), TemporalCorrelation>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &TemporalConfig {
        &self.config
    }

    /// Discover temporal relationships between the given entities
    pub fn analyze_temporal_patterns(&self, entities: &[Entity], events: &[EntityEvent]) -> Vec<Relationship> {
        self.analyze(entities, events).relationships
    }

    /// Discover temporal relationships, keeping the correlations
    ///
    /// The correlation cache holds the pairs of this run only; it is reset
    /// at the start of every call.
    pub fn analyze(&self, entities: &[Entity], events: &[EntityEvent]) -> TemporalAnalysis {
        self.cache.clear();

        let known: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let mut grouped: BTreeMap<&str, Vec<&EntityEvent>> = BTreeMap::new();
        for event in events {
            if event.value.is_finite() && known.contains(event.entity_id.as_str()) {
                grouped.entry(event.entity_id.as_str()).or_default().push(event);
            }
        }

        let series: Vec<(&str, DailySeries)> = grouped
            .into_iter()
            .filter(|(_, events)| events.len() >= self.config.min_events_per_entity)
            .filter_map(|(id, events)| DailySeries::from_events(&events, self.config.gap_fill).map(|s| (id, s)))
            .collect();

        if series.len() < 2 {
            debug!(eligible = series.len(), "Too few active entities for temporal analysis");
            return TemporalAnalysis::default();
        }

        let mut analysis = TemporalAnalysis::default();
        for (i, (id_a, a)) in series.iter().enumerate() {
            for (id_b, b) in &series[i + 1..] {
                let Some(correlation) = self.correlate(id_a, a, id_b, b) else {
                    continue;
                };
                self.cache
                    .put((id_a.to_string(), id_b.to_string()), correlation.clone());
                analysis.relationships.extend(self.relationships_for(&correlation));
                analysis.correlations.push(correlation);
            }
        }

        info!(
            entities = series.len(),
            correlations = analysis.correlations.len(),
            relationships = analysis.relationships.len(),
            "Analyzed temporal patterns"
        );
        analysis
    }

    /// Cached correlation for a pair from the latest run, in either order
    pub fn get_correlation(&self, entity1: &str, entity2: &str) -> Option<TemporalCorrelation> {
        let key = if entity1 <= entity2 {
            (entity1.to_string(), entity2.to_string())
        } else {
            (entity2.to_string(), entity1.to_string())
        };
        self.cache.get(&key)
    }

    /// Drop every cached correlation
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Windows of `window_days` holding unusually many events
    pub fn detect_temporal_clusters(&self, events: &[EntityEvent], window_days: u32) -> Vec<TemporalCluster> {
        if window_days == 0 || events.is_empty() || events.len() < self.config.min_cluster_size {
            return Vec::new();
        }

        let mut sorted: Vec<&EntityEvent> = events.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.entity_id.cmp(&b.entity_id)));

        let window = Duration::days(i64::from(window_days));
        let (first, last) = (sorted[0].timestamp, sorted[sorted.len() - 1].timestamp);
        let span_days = ((last - first).num_seconds() as f64 / 86_400.0).max(f64::from(window_days));
        let expected = sorted.len() as f64 / span_days * f64::from(window_days);
        let required = (self.config.cluster_density_factor * expected).max(self.config.min_cluster_size as f64);

        let mut clusters = Vec::new();
        let mut i = 0;
        while i < sorted.len() {
            let end = sorted[i].timestamp + window;
            let count = sorted[i..].iter().take_while(|e| e.timestamp < end).count();
            if count as f64 >= required {
                let members: Vec<EntityEvent> = sorted[i..i + count].iter().map(|e| (*e).clone()).collect();
                let mean_offset = members
                    .iter()
                    .map(|e| (e.timestamp - members[0].timestamp).num_seconds() as f64)
                    .sum::<f64>()
                    / count as f64;
                clusters.push(TemporalCluster {
                    center: members[0].timestamp + Duration::seconds(mean_offset.round() as i64),
                    events: members,
                });
                i += count;
            } else {
                i += 1;
            }
        }

        debug!(
            events = events.len(),
            window_days,
            clusters = clusters.len(),
            "Detected temporal clusters"
        );
        clusters
    }

    fn correlate(&self, id_a: &str, a: &DailySeries, id_b: &str, b: &DailySeries) -> Option<TemporalCorrelation> {
        let (x0, y0) = a.aligned(b, 0);
        if x0.len() < self.config.min_overlap_days {
            return None;
        }
        let r0 = pearson(&x0, &y0).unwrap_or(0.0);

        // lag > 0: a leads b
        let max_lag = i64::from(self.config.max_lag_days);
        let mut best = (0i64, r0, x0.len());
        for magnitude in 1..=max_lag {
            for lag in [magnitude, -magnitude] {
                let (x, y) = a.aligned(b, lag);
                if x.len() < self.config.min_overlap_days {
                    continue;
                }
                if let Some(r) = pearson(&x, &y) {
                    if r.abs() > best.1.abs() + 1e-9 {
                        best = (lag, r, x.len());
                    }
                }
            }
        }
        let (lag, lagged, samples) = best;

        let (leader, causality) = match lag {
            0 => (None, 0.0),
            l if l > 0 => (Some(id_a.to_string()), causality_score(a, b, l, lagged)),
            l => (Some(id_b.to_string()), causality_score(b, a, -l, lagged)),
        };

        let adequacy = (samples as f64 / self.config.full_confidence_samples.max(1) as f64).min(1.0);
        Some(TemporalCorrelation {
            entity1: id_a.to_string(),
            entity2: id_b.to_string(),
            correlation_coefficient: r0.clamp(-1.0, 1.0),
            optimal_lag_days: lag.unsigned_abs() as u32,
            lagged_correlation: lagged.clamp(-1.0, 1.0),
            leader,
            causality_score: causality,
            confidence: (lagged.abs() * adequacy).clamp(0.0, 1.0),
            sample_size: samples,
        })
    }

    fn relationships_for(&self, correlation: &TemporalCorrelation) -> Vec<Relationship> {
        if let Some((leader, follower)) = correlation.direction() {
            if correlation.causality_score >= self.config.causal_threshold {
                let evidence = format!(
                    "{} leads {} by {} days (r = {:.2}, causality = {:.2})",
                    leader, follower, correlation.optimal_lag_days, correlation.lagged_correlation, correlation.causality_score
                );
                return vec![
                    Relationship::new(leader, follower, RelationshipType::Precedes)
                        .with_confidence(correlation.confidence)
                        .with_evidence(evidence.clone()),
                    Relationship::new(leader, follower, RelationshipType::Influences)
                        .with_confidence(correlation.causality_score)
                        .with_evidence(evidence),
                ];
            }
        }

        let strongest = correlation
            .correlation_coefficient
            .abs()
            .max(correlation.lagged_correlation.abs());
        if strongest < self.config.min_correlation {
            return Vec::new();
        }

        vec![
            Relationship::new(&correlation.entity1, &correlation.entity2, RelationshipType::CorrelatesWith)
                .with_confidence(correlation.confidence)
                .with_evidence(format!(
                    "r = {:.2} at lag 0, {:.2} at {} days",
                    correlation.correlation_coefficient, correlation.lagged_correlation, correlation.optimal_lag_days
                ))
                .bidirectional(),
        ]
    }
}

impl Default for TemporalRelationshipAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// One value per calendar day from `start`
#[derive(Debug, Clone, PartialEq)]
struct DailySeries {
    start: NaiveDate,
    values: Vec<f64>,
}

impl DailySeries {
    fn from_events(events: &[&EntityEvent], gap_fill: GapFill) -> Option<Self> {
        let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for event in events {
            *daily.entry(event.timestamp.date_naive()).or_default() += event.value;
        }

        let (&start, _) = daily.first_key_value()?;
        let (&end, _) = daily.last_key_value()?;
        let days = (end - start).num_days() as usize + 1;

        let mut values = vec![0.0; days];
        let mut observed = vec![false; days];
        for (date, value) in &daily {
            let i = (*date - start).num_days() as usize;
            values[i] = *value;
            observed[i] = true;
        }

        match gap_fill {
            GapFill::Zero => {}
            GapFill::ForwardFill => {
                for i in 1..days {
                    if !observed[i] {
                        values[i] = values[i - 1];
                    }
                }
            }
            GapFill::Linear => {
                let known: Vec<usize> = (0..days).filter(|&i| observed[i]).collect();
                for pair in known.windows(2) {
                    let (lo, hi) = (pair[0], pair[1]);
                    let step = (values[hi] - values[lo]) / (hi - lo) as f64;
                    for i in lo + 1..hi {
                        values[i] = values[lo] + step * (i - lo) as f64;
                    }
                }
            }
        }

        Some(Self { start, values })
    }

    fn value_on(&self, day: i64) -> Option<f64> {
        usize::try_from(day).ok().and_then(|i| self.values.get(i).copied())
    }

    /// Pairs `(self[d], other[d + lag])` over every day `d` where both exist
    fn aligned(&self, other: &DailySeries, lag: i64) -> (Vec<f64>, Vec<f64>) {
        let offset = (self.start - other.start).num_days() + lag;
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, &x)| other.value_on(i as i64 + offset).map(|y| (x, y)))
            .unzip()
    }
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (dx, dy) = (x[i] - mean_x, y[i] - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then_some(r.clamp(-1.0, 1.0))
}

/// Lagged-regression improvement of `leader` as a predictor of `follower`
fn causality_score(leader: &DailySeries, follower: &DailySeries, lag: i64, lagged_r: f64) -> f64 {
    // triples (y[t], y[t-1], x[t-lag]) on the follower's calendar
    let offset = (follower.start - leader.start).num_days();
    let mut y = Vec::new();
    let mut y_prev = Vec::new();
    let mut x_lagged = Vec::new();
    for t in 1..follower.values.len() {
        if let Some(x) = leader.value_on(t as i64 + offset - lag) {
            y.push(follower.values[t]);
            y_prev.push(follower.values[t - 1]);
            x_lagged.push(x);
        }
    }

    let gain = regression_gain(&y, &y_prev, &x_lagged);
    (lagged_r.abs() * (0.5 + 0.5 * gain)).clamp(0.0, 1.0)
}

fn regression_gain(y: &[f64], y_prev: &[f64], x: &[f64]) -> f64 {
    if y.len() < 3 {
        return 0.0;
    }
    let r1 = pearson(y, y_prev).unwrap_or(0.0);
    let r2 = pearson(y, x).unwrap_or(0.0);
    let r12 = pearson(y_prev, x).unwrap_or(0.0);

    let restricted = r1 * r1;
    let full = if (1.0 - r12 * r12) <= 1e-9 {
        restricted.max(r2 * r2)
    } else {
        ((r1 * r1 + r2 * r2 - 2.0 * r1 * r2 * r12) / (1.0 - r12 * r12)).clamp(0.0, 1.0)
    };

    if restricted >= 1.0 - 1e-9 {
        return 0.0;
    }
    ((full - restricted) / (1.0 - restricted)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::entity::EntityType;
    use chrono::TimeZone;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(n)
    }

    // aperiodic over the test horizon, so only the true lag correlates fully
    fn signal(i: i64) -> f64 {
        ((i * i * 31 + i * 7) % 97) as f64
    }

    fn series_events(id: &str, shift: i64, days: i64) -> Vec<EntityEvent> {
        (0..days)
            .map(|i| EntityEvent::new(id, "usage", day(i + shift), signal(i)))
            .collect()
    }

    fn entities(ids: &[&str]) -> Vec<Entity> {
        ids.iter().map(|id| Entity::new(*id, EntityType::Customer)).collect()
    }

    #[test]
    fn test_shifted_series_recovers_lag() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 0, 60);
        events.extend(series_events("b", 4, 60));

        let analysis = analyzer.analyze(&entities(&["a", "b"]), &events);
        let correlation = &analysis.correlations[0];

        assert_eq!(correlation.optimal_lag_days, 4);
        assert_eq!(correlation.leader.as_deref(), Some("a"));
        assert!((correlation.lagged_correlation - 1.0).abs() < 1e-9);
        assert!(correlation.causality_score > analyzer.config().causal_threshold);

        let types: BTreeSet<_> = analysis.relationships.iter().map(|r| r.relationship_type).collect();
        assert_eq!(
            types,
            BTreeSet::from([RelationshipType::Precedes, RelationshipType::Influences])
        );
        assert!(analysis.relationships.iter().all(|r| r.source_id == "a"));
    }

    #[test]
    fn test_follower_listed_first_still_resolves_direction() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 3, 50);
        events.extend(series_events("b", 0, 50));

        let analysis = analyzer.analyze(&entities(&["a", "b"]), &events);
        assert_eq!(analysis.correlations[0].optimal_lag_days, 3);
        assert_eq!(analysis.correlations[0].direction(), Some(("b", "a")));
    }

    #[test]
    fn test_simultaneous_series_correlate() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 0, 40);
        events.extend(
            (0..40).map(|i| EntityEvent::new("b", "usage", day(i), 2.0 * signal(i) + 1.0)),
        );

        let rels = analyzer.analyze_temporal_patterns(&entities(&["a", "b"]), &events);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship_type, RelationshipType::CorrelatesWith);
        assert!(rels[0].is_bidirectional());

        let correlation = analyzer.get_correlation("b", "a").unwrap();
        assert_eq!(correlation.optimal_lag_days, 0);
        assert_eq!(correlation.causality_score, 0.0);
        assert!(correlation.confidence > 0.9);
    }

    #[test]
    fn test_too_few_events() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 0, 4);
        events.extend(series_events("b", 0, 4));
        assert!(analyzer.analyze_temporal_patterns(&entities(&["a", "b"]), &events).is_empty());
        assert!(analyzer.analyze_temporal_patterns(&[], &[]).is_empty());
    }

    #[test]
    fn test_unknown_entities_ignored() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 0, 30);
        events.extend(series_events("ghost", 2, 30));
        assert!(analyzer.analyze_temporal_patterns(&entities(&["a"]), &events).is_empty());
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 0, 40);
        events.extend(series_events("b", 2, 40));
        events.push(EntityEvent::new("a", "usage", day(10), f64::NAN));
        events.push(EntityEvent::new("b", "usage", day(20), f64::INFINITY));

        let analysis = analyzer.analyze(&entities(&["a", "b"]), &events);
        let correlation = &analysis.correlations[0];
        assert!((-1.0..=1.0).contains(&correlation.correlation_coefficient));
        assert!(correlation.confidence.is_finite());
        assert_eq!(correlation.optimal_lag_days, 2);

        // nothing but NaN leaves no eligible series
        let noise: Vec<EntityEvent> = (0..10)
            .flat_map(|i| {
                [
                    EntityEvent::new("a", "usage", day(i), f64::NAN),
                    EntityEvent::new("b", "usage", day(i), f64::NAN),
                ]
            })
            .collect();
        assert!(analyzer.analyze(&entities(&["a", "b"]), &noise).correlations.is_empty());
    }

    #[test]
    fn test_empty_events_with_zero_cluster_size() {
        let analyzer = TemporalRelationshipAnalyzer::with_config(TemporalConfig {
            min_cluster_size: 0,
            ..Default::default()
        });
        assert!(analyzer.detect_temporal_clusters(&[], 1).is_empty());
    }

    #[test]
    fn test_cache_cleared() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events = series_events("a", 0, 30);
        events.extend(series_events("b", 1, 30));
        analyzer.analyze(&entities(&["a", "b"]), &events);

        assert!(analyzer.get_correlation("a", "b").is_some());
        analyzer.clear_cache();
        assert!(analyzer.get_correlation("a", "b").is_none());
    }

    #[test]
    fn test_same_day_values_are_summed() {
        let events = [
            EntityEvent::new("a", "x", day(0), 1.0),
            EntityEvent::new("a", "x", day(0), 2.0),
            EntityEvent::new("a", "x", day(2), 5.0),
        ];
        let refs: Vec<&EntityEvent> = events.iter().collect();

        let zero = DailySeries::from_events(&refs, GapFill::Zero).unwrap();
        assert_eq!(zero.values, vec![3.0, 0.0, 5.0]);

        let forward = DailySeries::from_events(&refs, GapFill::ForwardFill).unwrap();
        assert_eq!(forward.values, vec![3.0, 3.0, 5.0]);

        let linear = DailySeries::from_events(&refs, GapFill::Linear).unwrap();
        assert_eq!(linear.values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_causality_grows_with_correlation() {
        let leader = DailySeries {
            start: day(0).date_naive(),
            values: (0..40).map(signal).collect(),
        };
        let follower = DailySeries {
            start: day(2).date_naive(),
            values: leader.values.clone(),
        };
        let weak = causality_score(&leader, &follower, 2, 0.5);
        let strong = causality_score(&leader, &follower, 2, 0.9);
        assert!(strong > weak);
    }

    #[test]
    fn test_temporal_clusters() {
        let analyzer = TemporalRelationshipAnalyzer::new();
        let mut events: Vec<EntityEvent> = (0..20)
            .map(|i| EntityEvent::new("a", "ticket", day(i * 5), 1.0))
            .collect();
        events.extend((0..6).map(|i| EntityEvent::new("b", "ticket", day(51) + Duration::hours(i), 1.0)));

        let clusters = analyzer.detect_temporal_clusters(&events, 2);
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].events.len() >= 6);
        assert_eq!(clusters[0].center.date_naive(), day(51).date_naive());

        assert!(analyzer.detect_temporal_clusters(&events, 0).is_empty());
    }
}
