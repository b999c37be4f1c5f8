//! Structured logging setup for applications built on densa
//!
//! densa itself only emits `tracing` events. Scope push and pop log at
//! `debug`, pool hits, misses and kernel dispatch at `trace`, and tensors
//! still alive at final teardown at `warn`. This module installs a
//! subscriber that prints them.
//!
//! # Example
//!
//! ```ignore
//! use densa::tracing_support::{init_tracing, TracingConfig, TracingFormat};
//!
//! init_tracing(TracingConfig {
//!     format: TracingFormat::Json,
//!     filter: "densa_core=debug,densa_kernels=info".to_string(),
//!     ..TracingConfig::default()
//! })?;
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directive (default `densa_core=info,densa_kernels=info,warn`)
//! - `DENSA_LOG_FORMAT`: `pretty`, `json` or `compact` (default `pretty`)

use anyhow::Result;
use densa_core::PoolStats;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable selecting the output format
pub const ENV_LOG_FORMAT: &str = "DENSA_LOG_FORMAT";

const DEFAULT_FILTER: &str = "densa_core=info,densa_kernels=info,warn";

/// Tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line human-readable output
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl TracingFormat {
    /// Parse a format name; anything unknown is `Pretty`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => TracingFormat::Json,
            "compact" => TracingFormat::Compact,
            _ => TracingFormat::Pretty,
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub format: TracingFormat,
    /// `EnvFilter` directive, e.g. `densa_core=debug,info`
    pub filter: String,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl TracingConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = lookup(ENV_LOG_FORMAT)
            .map(|s| TracingFormat::parse(&s))
            .unwrap_or(TracingFormat::Pretty);
        let filter = lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string());

        Self {
            format,
            filter,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// Install the global subscriber; call once at startup
#[cfg(feature = "tracing")]
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)?;

    match config.format {
        TracingFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_file)
                .with_line_number(config.with_line_number)
                .with_filter(filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
        TracingFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_file)
                .with_line_number(config.with_line_number)
                .with_filter(filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
        TracingFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_file)
                .with_line_number(config.with_line_number)
                .with_filter(filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
    }

    Ok(())
}

/// No-op without the `tracing` feature
#[cfg(not(feature = "tracing"))]
pub fn init_tracing(_config: TracingConfig) -> Result<()> {
    Ok(())
}

/// Emit one `info` event summarising pool reuse
pub fn record_pool_stats(label: &str, stats: &PoolStats) {
    tracing::info!(
        label,
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate,
        pooled_bytes = stats.total_bytes_pooled,
        "segment pool"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_format_parse() {
        assert_eq!(TracingFormat::parse("json"), TracingFormat::Json);
        assert_eq!(TracingFormat::parse("COMPACT"), TracingFormat::Compact);
        assert_eq!(TracingFormat::parse("unknown"), TracingFormat::Pretty);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = TracingConfig::from_lookup(|key| match key {
            ENV_LOG_FORMAT => Some("json".to_string()),
            _ => None,
        });
        assert_eq!(config.format, TracingFormat::Json);
        assert_eq!(config.filter, DEFAULT_FILTER);

        let config = TracingConfig::from_lookup(|key| match key {
            "RUST_LOG" => Some("densa_core=trace".to_string()),
            _ => None,
        });
        assert_eq!(config.format, TracingFormat::Pretty);
        assert_eq!(config.filter, "densa_core=trace");
    }
}
