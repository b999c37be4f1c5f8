//! Multithreaded CPU provider

use densa_core::{PoolStats, TensorContext};

use crate::config::ProviderConfig;
use crate::provider::LinearAlgebraProvider;

/// Provider running every kernel on the CPU.
///
/// Owns its [`TensorContext`]; dropping the provider closes every scope the
/// context still has open.
#[derive(Debug)]
pub struct CpuProvider {
    context: TensorContext,
    config: ProviderConfig,
}

impl CpuProvider {
    /// Provider with the default configuration
    pub fn new() -> Self {
        Self::with_config(ProviderConfig::default())
    }

    /// Provider with a fresh context built from `config`
    pub fn with_config(config: ProviderConfig) -> Self {
        let context = TensorContext::new(config.pool_config());
        tracing::debug!(
            parallel_threshold = config.parallel_threshold,
            pooling = config.pooling,
            "created cpu provider"
        );
        Self { context, config }
    }

    /// Provider sharing an existing context
    pub fn with_context(context: TensorContext, config: ProviderConfig) -> Self {
        Self { context, config }
    }

    /// Configuration read from `DENSA_*` environment variables
    pub fn from_env() -> Self {
        Self::with_config(ProviderConfig::from_env())
    }

    /// Pool hit and miss counters
    pub fn pool_stats(&self) -> PoolStats {
        self.context.pool_stats()
    }
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearAlgebraProvider for CpuProvider {
    fn name(&self) -> &str {
        "cpu"
    }

    fn context(&self) -> &TensorContext {
        &self.context
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

impl Drop for CpuProvider {
    fn drop(&mut self) {
        let disposed = self.context.dispose_all_scopes();
        if disposed > 0 {
            tracing::debug!(disposed, "cpu provider closed open scopes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use densa_core::ShapedTensor;

    #[test]
    fn test_results_come_from_provider_context() {
        let provider = CpuProvider::new();
        let a = provider.context().create_matrix_from(2, 2, &[1.0, 3.0, 2.0, 4.0]).unwrap();
        let b = provider.context().create_identity_matrix(2);
        let product = provider.multiply(&a, &b).unwrap();
        assert_eq!(product.to_vec().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(product.segment().ref_count(), 1);
    }

    #[test]
    fn test_drop_closes_scopes() {
        let provider = CpuProvider::new();
        provider.push_scope();
        let vector = provider.create_vector(4, true);
        provider.push_scope();
        assert_eq!(provider.context().scopes().depth(), 2);

        let context = provider.context().clone();
        drop(provider);
        assert_eq!(context.scopes().depth(), 0);
        assert!(!vector.is_valid());
    }

    #[test]
    fn test_serial_config() {
        let provider = CpuProvider::with_config(ProviderConfig::serial());
        assert_eq!(provider.config().parallel_threshold, usize::MAX);
        assert_eq!(provider.name(), "cpu");
    }
}
