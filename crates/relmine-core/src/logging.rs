//! Tracing subscriber setup for embedders and tests

use anyhow::{Context, anyhow};
use tracing_subscriber::EnvFilter;

/// Directive applied on top of `RUST_LOG`
pub const DEFAULT_DIRECTIVE: &str = "relmine=info";

/// Install a formatting subscriber filtered by `RUST_LOG` plus `default_directive`
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init(default_directive: &str) -> anyhow::Result<()> {
    let directive = default_directive
        .parse()
        .with_context(|| format!("Invalid log directive: {}", default_directive))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

/// [`init`] with [`DEFAULT_DIRECTIVE`]
pub fn init_default() -> anyhow::Result<()> {
    init(DEFAULT_DIRECTIVE)
}
