//! Tracing/logging initialization.
//!
//! The auth core only emits `tracing` events; the embedding process decides
//! where they go by calling [`init`] or [`try_init`] once at startup.

use anyhow::Context;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, with timestamps.
    #[default]
    Json,
    /// Human-readable multi-line output for local development.
    Pretty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive (e.g. `"netra_auth=debug,info"`). When unset,
    /// `RUST_LOG` is consulted, falling back to `info`.
    pub filter: Option<String>,
    pub format: LogFormat,
}

/// Initialize JSON tracing/logging for the process, configurable via `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let _ = try_init(&ObservabilityConfig::default());
}

/// Install the global subscriber described by `config`.
///
/// Fails on a bad filter directive or when a global subscriber is already set.
pub fn try_init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = match config.filter.as_deref() {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter '{directive}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
