//! Modularity-based community detection
//!
//! Local moving of nodes between communities to maximise modularity
//!
//! Q = (1/2m) * Σij [Aij - γ * ki * kj / 2m] * δ(ci, cj)
//!
//! followed by a refinement pass that splits any community whose members
//! are not connected inside it, so every reported community is internally
//! connected. Nodes are visited in an order drawn from a seeded RNG and all
//! ties break towards the lower community label, so a given seed always
//! yields the same partition.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Gains below this are treated as no improvement
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct CommunityDetector {
    /// Higher values favour more, smaller communities
    pub resolution: f64,
    pub max_iterations: usize,
    pub seed: u64,
}

impl CommunityDetector {
    pub fn new(seed: u64) -> Self {
        Self {
            resolution: 1.0,
            max_iterations: 50,
            seed,
        }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Community label per node, numbered by first appearance
    ///
    /// `weights[i]` maps each neighbour of `i` to the undirected edge weight.
    pub fn detect(&self, weights: &[BTreeMap<usize, f64>]) -> Vec<usize> {
        let n = weights.len();
        let degrees: Vec<f64> = weights.iter().map(|row| row.values().sum()).collect();
        let total: f64 = degrees.iter().sum();
        if total <= 0.0 {
            return (0..n).collect();
        }

        let mut community: Vec<usize> = (0..n).collect();
        let mut community_degree = degrees.clone();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..n).collect();

        for _ in 0..self.max_iterations {
            order.shuffle(&mut rng);
            let mut moved = false;

            for &node in &order {
                let current = community[node];
                let k = degrees[node];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for (&neighbour, &w) in &weights[node] {
                    if neighbour != node {
                        *links.entry(community[neighbour]).or_default() += w;
                    }
                }

                community_degree[current] -= k;
                let gain = |c: usize, w: f64| w - self.resolution * k * community_degree[c] / total;

                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&candidate, &w) in &links {
                    let candidate_gain = gain(candidate, w);
                    if candidate_gain > best_gain + MIN_GAIN {
                        best = candidate;
                        best_gain = candidate_gain;
                    }
                }

                community_degree[best] += k;
                if best != current {
                    community[node] = best;
                    moved = true;
                }
            }

            if !moved {
                break;
            }
        }

        renumber(&split_disconnected(weights, &community))
    }
}

/// Split every community into its internally connected components
fn split_disconnected(weights: &[BTreeMap<usize, f64>], community: &[usize]) -> Vec<usize> {
    let n = community.len();
    let mut refined = vec![usize::MAX; n];
    let mut next_label = 0;

    for start in 0..n {
        if refined[start] != usize::MAX {
            continue;
        }
        refined[start] = next_label;
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for (&neighbour, &w) in &weights[node] {
                if w > 0.0 && refined[neighbour] == usize::MAX && community[neighbour] == community[node] {
                    refined[neighbour] = next_label;
                    stack.push(neighbour);
                }
            }
        }
        next_label += 1;
    }

    refined
}

fn renumber(labels: &[usize]) -> Vec<usize> {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    labels
        .iter()
        .map(|label| {
            let next = mapping.len();
            *mapping.entry(*label).or_insert(next)
        })
        .collect()
}

/// Modularity of a partition
pub fn modularity(weights: &[BTreeMap<usize, f64>], community: &[usize], resolution: f64) -> f64 {
    let degrees: Vec<f64> = weights.iter().map(|row| row.values().sum()).collect();
    let total: f64 = degrees.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let mut q = 0.0;
    for i in 0..weights.len() {
        for j in 0..weights.len() {
            if community[i] == community[j] {
                let a = weights[i].get(&j).copied().unwrap_or(0.0);
                q += a - resolution * degrees[i] * degrees[j] / total;
            }
        }
    }
    q / total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn undirected(n: usize, edges: &[(usize, usize, f64)]) -> Vec<BTreeMap<usize, f64>> {
        let mut weights = vec![BTreeMap::new(); n];
        for &(a, b, w) in edges {
            weights[a].insert(b, w);
            weights[b].insert(a, w);
        }
        weights
    }

    fn two_triangles() -> Vec<BTreeMap<usize, f64>> {
        undirected(
            6,
            &[
                (0, 1, 1.0),
                (1, 2, 1.0),
                (0, 2, 1.0),
                (3, 4, 1.0),
                (4, 5, 1.0),
                (3, 5, 1.0),
                (2, 3, 0.1),
            ],
        )
    }

    #[test]
    fn test_two_dense_groups() {
        let labels = CommunityDetector::new(42).detect(&two_triangles());

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let weights = two_triangles();
        let detector = CommunityDetector::new(7);
        assert_eq!(detector.detect(&weights), detector.detect(&weights));
    }

    #[test]
    fn test_partition_beats_singletons() {
        let weights = two_triangles();
        let labels = CommunityDetector::new(42).detect(&weights);
        let singletons: Vec<usize> = (0..6).collect();
        assert!(modularity(&weights, &labels, 1.0) > modularity(&weights, &singletons, 1.0));
    }

    #[test]
    fn test_edgeless_graph() {
        let weights = vec![BTreeMap::new(); 3];
        assert_eq!(CommunityDetector::new(1).detect(&weights), vec![0, 1, 2]);
    }

    #[test]
    fn test_split_disconnected() {
        let weights = undirected(4, &[(0, 1, 1.0), (2, 3, 1.0)]);
        let refined = split_disconnected(&weights, &[0, 0, 0, 0]);
        assert_eq!(renumber(&refined), vec![0, 0, 1, 1]);
    }
}
