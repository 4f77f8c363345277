//! Configuration management with file persistence
//!
//! One TOML section per mining component. Every section is optional in the
//! file; missing keys fall back to the documented defaults.
//!
//! ```toml
//! [resolution]
//! similarity_threshold = 0.9
//! merge_strategy = "weighted"
//!
//! [resolution.source_weights]
//! crm = 0.9
//! billing = 0.6
//!
//! [multi_hop]
//! max_hops = 4
//! ```

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::changes::ChangeDetectionConfig;
use crate::domain::knowledge::{
    MergeStrategy, MultiHopConfig, PatternConfig, RelationshipConfig, ResolutionConfig, TemporalConfig,
    ValidationConfig,
};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "RELMINE_CONFIG_DIR";

/// Relmine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelMineConfig {
    pub validation: ValidationConfig,
    pub changes: ChangeDetectionConfig,
    pub resolution: ResolutionConfig,
    pub relationships: RelationshipConfig,
    pub multi_hop: MultiHopConfig,
    pub patterns: PatternConfig,
    pub temporal: TemporalConfig,
}

impl RelMineConfig {
    /// Get the configuration directory
    ///
    /// `RELMINE_CONFIG_DIR` wins over the platform config directory.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("relmine")
        };
        Ok(dir)
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load from the default location, or defaults when no file exists
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RelMineConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Validate and write to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Reject out-of-range thresholds and unknown names
    pub fn validate(&self) -> anyhow::Result<()> {
        let unit_interval = [
            ("changes.significance_threshold", self.changes.significance_threshold),
            ("changes.create_significance", self.changes.create_significance),
            ("changes.delete_significance", self.changes.delete_significance),
            ("resolution.similarity_threshold", self.resolution.similarity_threshold),
            ("resolution.default_source_weight", self.resolution.default_source_weight),
            ("relationships.explicit_confidence", self.relationships.explicit_confidence),
            ("relationships.temporal_confidence", self.relationships.temporal_confidence),
            ("relationships.semantic_confidence", self.relationships.semantic_confidence),
            ("multi_hop.min_path_strength", self.multi_hop.min_path_strength),
            ("multi_hop.length_penalty", self.multi_hop.length_penalty),
            ("multi_hop.bottleneck_ratio", self.multi_hop.bottleneck_ratio),
            ("patterns.direction_ratio", self.patterns.direction_ratio),
            ("temporal.min_correlation", self.temporal.min_correlation),
            ("temporal.causal_threshold", self.temporal.causal_threshold),
        ];
        for (key, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0.0 and 1.0, got {}", key, value));
            }
        }

        for (source, weight) in &self.resolution.source_weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(anyhow!(
                    "resolution.source_weights.{} must be between 0.0 and 1.0, got {}",
                    source,
                    weight
                ));
            }
        }

        MergeStrategy::parse(&self.resolution.merge_strategy)
            .map_err(|e| anyhow!("resolution.merge_strategy: {}", e))?;

        if self.multi_hop.max_hops < 2 {
            return Err(anyhow!(
                "multi_hop.max_hops must be at least 2, got {}",
                self.multi_hop.max_hops
            ));
        }

        let windows = [
            ("multi_hop.max_targets_per_source", self.multi_hop.max_targets_per_source),
            ("multi_hop.max_paths_per_pair", self.multi_hop.max_paths_per_pair),
            ("temporal.min_events_per_entity", self.temporal.min_events_per_entity),
            ("temporal.min_overlap_days", self.temporal.min_overlap_days),
            ("temporal.full_confidence_samples", self.temporal.full_confidence_samples),
            ("temporal.min_cluster_size", self.temporal.min_cluster_size),
            ("patterns.min_community_size", self.patterns.min_community_size),
        ];
        for (key, value) in windows {
            if value == 0 {
                return Err(anyhow!("{} must be greater than zero", key));
            }
        }

        if self.patterns.community_resolution <= 0.0 {
            return Err(anyhow!("patterns.community_resolution must be positive"));
        }
        if self.temporal.cluster_density_factor <= 0.0 {
            return Err(anyhow!("temporal.cluster_density_factor must be positive"));
        }

        Ok(())
    }

    /// Read a scalar setting by dotted key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Change detection
            "changes.significance_threshold" => Ok(self.changes.significance_threshold.to_string()),
            "changes.default_field_weight" => Ok(self.changes.default_field_weight.to_string()),
            "changes.create_significance" => Ok(self.changes.create_significance.to_string()),
            "changes.delete_significance" => Ok(self.changes.delete_significance.to_string()),

            // Resolution
            "resolution.similarity_threshold" => Ok(self.resolution.similarity_threshold.to_string()),
            "resolution.merge_strategy" => Ok(self.resolution.merge_strategy.clone()),
            "resolution.default_source_weight" => Ok(self.resolution.default_source_weight.to_string()),
            "resolution.cross_reference_fields" => Ok(self.resolution.cross_reference_fields.join(", ")),

            // Relationship building
            "relationships.explicit_confidence" => Ok(self.relationships.explicit_confidence.to_string()),
            "relationships.temporal_confidence" => Ok(self.relationships.temporal_confidence.to_string()),
            "relationships.semantic_confidence" => Ok(self.relationships.semantic_confidence.to_string()),

            // Multi-hop discovery
            "multi_hop.max_hops" => Ok(self.multi_hop.max_hops.to_string()),
            "multi_hop.max_targets_per_source" => Ok(self.multi_hop.max_targets_per_source.to_string()),
            "multi_hop.max_paths_per_pair" => Ok(self.multi_hop.max_paths_per_pair.to_string()),
            "multi_hop.min_path_strength" => Ok(self.multi_hop.min_path_strength.to_string()),
            "multi_hop.length_penalty" => Ok(self.multi_hop.length_penalty.to_string()),

            // Patterns
            "patterns.min_connections" => Ok(self.patterns.min_connections.to_string()),
            "patterns.min_spokes" => Ok(self.patterns.min_spokes.to_string()),
            "patterns.min_chain_length" => Ok(self.patterns.min_chain_length.to_string()),
            "patterns.min_community_size" => Ok(self.patterns.min_community_size.to_string()),
            "patterns.community_seed" => Ok(self.patterns.community_seed.to_string()),
            "patterns.parallel_detection" => Ok(self.patterns.parallel_detection.to_string()),

            // Temporal analysis
            "temporal.min_events_per_entity" => Ok(self.temporal.min_events_per_entity.to_string()),
            "temporal.max_lag_days" => Ok(self.temporal.max_lag_days.to_string()),
            "temporal.min_correlation" => Ok(self.temporal.min_correlation.to_string()),
            "temporal.causal_threshold" => Ok(self.temporal.causal_threshold.to_string()),

            _ => Err(anyhow!("Unknown configuration key: {}", key)),
        }
    }
}
