//! Config module tests

use crate::config::RelMineConfig;
use crate::domain::knowledge::{EntityType, GapFill, MergeStrategy};

#[test]
fn test_config_default() {
    let config = RelMineConfig::default();

    assert_eq!(config.resolution.similarity_threshold, 0.85);
    assert_eq!(config.resolution.merge_strategy, "most_complete");
    assert_eq!(config.multi_hop.max_hops, 3);
    assert_eq!(config.patterns.min_connections, 3);
    assert_eq!(config.patterns.community_seed, 42);
    assert_eq!(config.temporal.min_events_per_entity, 5);
    assert_eq!(config.temporal.max_lag_days, 14);
    assert_eq!(config.temporal.gap_fill, GapFill::Zero);
    assert_eq!(config.changes.significance_threshold, 0.1);
    assert!(config.validation.rules.contains_key(&EntityType::Customer));

    config.validate().unwrap();
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = RelMineConfig::default();
    config.resolution.merge_strategy = MergeStrategy::Weighted.as_str().to_string();
    config.resolution.source_weights.insert("crm".into(), 0.9);
    config.multi_hop.max_hops = 4;
    config.temporal.gap_fill = GapFill::Linear;

    config.save_to(&path).unwrap();
    let loaded = RelMineConfig::load_from(&path).unwrap();

    assert_eq!(loaded.resolution.merge_strategy, "weighted");
    assert_eq!(loaded.resolution.source_weights.get("crm"), Some(&0.9));
    assert_eq!(loaded.multi_hop.max_hops, 4);
    assert_eq!(loaded.temporal.gap_fill, GapFill::Linear);
    assert_eq!(loaded.validation.rules, config.validation.rules);
    assert_eq!(
        loaded.relationships.explicit_rules.len(),
        config.relationships.explicit_rules.len()
    );
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[resolution]\nsimilarity_threshold = 0.9\n\n[patterns]\nmin_spokes = 5\n",
    )
    .unwrap();

    let config = RelMineConfig::load_from(&path).unwrap();

    assert_eq!(config.resolution.similarity_threshold, 0.9);
    assert_eq!(config.resolution.merge_strategy, "most_complete");
    assert_eq!(config.patterns.min_spokes, 5);
    assert_eq!(config.patterns.min_chain_length, 3);
    assert_eq!(config.multi_hop.max_hops, 3);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[multi_hop]\nmax_hops = 1\n").unwrap();

    let err = RelMineConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("max_hops"));
}

#[test]
fn test_unparseable_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[resolution\n").unwrap();

    let err = RelMineConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_validate_rejects_out_of_range_thresholds() {
    let mut config = RelMineConfig::default();
    config.temporal.min_correlation = 1.5;
    assert!(config.validate().is_err());

    let mut config = RelMineConfig::default();
    config.resolution.source_weights.insert("crm".into(), -0.1);
    assert!(config.validate().is_err());

    let mut config = RelMineConfig::default();
    config.temporal.min_overlap_days = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_cluster_size() {
    let mut config = RelMineConfig::default();
    config.temporal.min_cluster_size = 0;

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("temporal.min_cluster_size"));
}

#[test]
fn test_validate_rejects_unknown_merge_strategy() {
    let mut config = RelMineConfig::default();
    config.resolution.merge_strategy = "loudest".into();

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("merge_strategy"));
}

#[test]
fn test_save_refuses_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = RelMineConfig::default();
    config.multi_hop.max_hops = 0;

    assert!(config.save_to(&path).is_err());
    assert!(!path.exists());
}

#[test]
fn test_get_dotted_keys() {
    let config = RelMineConfig::default();

    assert_eq!(config.get("multi_hop.max_hops").unwrap(), "3");
    assert_eq!(config.get("resolution.merge_strategy").unwrap(), "most_complete");
    assert_eq!(config.get("patterns.parallel_detection").unwrap(), "true");
    assert!(config.get("llm.default_model").is_err());
}
