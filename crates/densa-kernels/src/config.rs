//! Provider configuration
//!
//! Every field has a default; `from_env` overrides them from
//! `DENSA_PARALLEL_THRESHOLD` and `DENSA_POOLING`.

use densa_core::PoolConfig;

/// Element count at or above which kernels fan out across threads
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 10_000;

/// Side length below which the recursive transpose stops splitting
pub const DEFAULT_TRANSPOSE_BLOCK: usize = 16;

/// Environment variable overriding [`ProviderConfig::parallel_threshold`]
pub const ENV_PARALLEL_THRESHOLD: &str = "DENSA_PARALLEL_THRESHOLD";

/// Environment variable overriding [`ProviderConfig::pooling`]
pub const ENV_POOLING: &str = "DENSA_POOLING";

/// Tuning knobs shared by every kernel a provider runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProviderConfig {
    /// Minimum element count for parallel execution
    pub parallel_threshold: usize,
    /// Leaf size of the cache-oblivious transpose
    pub transpose_block: usize,
    /// Reuse released buffers through the segment pool
    pub pooling: bool,
    /// Idle buffers kept per element count when pooling
    pub max_pooled_per_size: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            transpose_block: DEFAULT_TRANSPOSE_BLOCK,
            pooling: true,
            max_pooled_per_size: PoolConfig::default().max_buffers_per_size,
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that never goes parallel
    pub fn serial() -> Self {
        Self::default().with_parallel_threshold(usize::MAX)
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Configure the transpose leaf size (clamped to at least 1)
    pub fn with_transpose_block(mut self, block: usize) -> Self {
        self.transpose_block = block.max(1);
        self
    }

    pub fn with_pooling(mut self, enabled: bool) -> Self {
        self.pooling = enabled;
        self
    }

    pub fn with_max_pooled_per_size(mut self, count: usize) -> Self {
        self.max_pooled_per_size = count;
        self
    }

    /// Defaults overridden by `DENSA_PARALLEL_THRESHOLD` and `DENSA_POOLING`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PARALLEL_THRESHOLD) {
            match raw.trim().parse::<usize>() {
                Ok(threshold) => config.parallel_threshold = threshold,
                Err(_) => tracing::warn!(
                    variable = ENV_PARALLEL_THRESHOLD,
                    value = %raw,
                    "ignoring invalid parallel threshold"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_POOLING) {
            match parse_flag(&raw) {
                Some(enabled) => config.pooling = enabled,
                None => tracing::warn!(
                    variable = ENV_POOLING,
                    value = %raw,
                    "ignoring invalid pooling flag"
                ),
            }
        }

        config
    }

    /// Segment pool settings derived from this configuration
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            enabled: self.pooling,
            max_buffers_per_size: self.max_pooled_per_size,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
