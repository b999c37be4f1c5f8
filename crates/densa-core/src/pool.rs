//! Buffer pool backing pooled segments
//!
//! Buffers are keyed by their element count. A pooled segment checks a
//! buffer out on creation and hands it back when its reference count drops
//! to zero, so repeated kernels with the same output size stop allocating.
//!
//! # Statistics
//!
//! The pool tracks:
//! - **hits**: Number of successful buffer reuses
//! - **misses**: Number of new allocations
//! - **total_releases**: Number of buffers handed back
//! - **total_buffers_pooled**: Buffers currently waiting for reuse

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::segment::Scalar;

/// Default number of buffers kept per element count
pub const DEFAULT_MAX_BUFFERS_PER_SIZE: usize = 16;

/// Pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Reuse released buffers; when false every checkout allocates
    pub enabled: bool,
    /// Upper bound on idle buffers kept for one element count
    pub max_buffers_per_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_buffers_per_size: DEFAULT_MAX_BUFFERS_PER_SIZE,
        }
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    /// Number of buffer reuses (cache hits)
    pub hits: usize,
    /// Number of new allocations (cache misses)
    pub misses: usize,
    /// Total number of checkout requests
    pub total_allocations: usize,
    /// Total number of buffers handed back
    pub total_releases: usize,
    /// Cache hit rate (hits / total)
    pub hit_rate: f64,
    /// Number of distinct buffer sizes currently pooled
    pub unique_sizes: usize,
    /// Total bytes currently pooled
    pub total_bytes_pooled: usize,
    /// Total number of buffers currently pooled
    pub total_buffers_pooled: usize,
}

/// Size-keyed free lists of scalar buffers
struct FreeLists {
    buffers: HashMap<usize, Vec<Vec<Scalar>>>,
    hits: usize,
    misses: usize,
    total_allocations: usize,
    total_releases: usize,
    config: PoolConfig,
}

impl FreeLists {
    fn new(config: PoolConfig) -> Self {
        Self {
            buffers: HashMap::new(),
            hits: 0,
            misses: 0,
            total_allocations: 0,
            total_releases: 0,
            config,
        }
    }

    /// Check out a buffer of exactly `size` elements.
    ///
    /// Reused buffers keep their previous contents unless `zeroed` is set.
    fn acquire(&mut self, size: usize, zeroed: bool) -> Vec<Scalar> {
        self.total_allocations += 1;

        if self.config.enabled {
            if let Some(mut buffer) = self.buffers.get_mut(&size).and_then(|free| free.pop()) {
                self.hits += 1;
                if zeroed {
                    buffer.fill(0.0);
                }
                tracing::trace!(size, "segment pool hit");
                return buffer;
            }
        }

        self.misses += 1;
        tracing::trace!(size, "segment pool miss");
        vec![0.0; size]
    }

    fn release(&mut self, buffer: Vec<Scalar>) {
        self.total_releases += 1;

        if !self.config.enabled {
            return;
        }

        let free = self.buffers.entry(buffer.len()).or_default();
        if free.len() < self.config.max_buffers_per_size {
            free.push(buffer);
        }
        // If the free list is full, buffer is dropped
    }

    fn stats(&self) -> PoolStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };

        let elem_size = std::mem::size_of::<Scalar>();
        let mut total_bytes_pooled = 0;
        let mut total_buffers_pooled = 0;
        for free in self.buffers.values() {
            total_buffers_pooled += free.len();
            for buffer in free {
                total_bytes_pooled += buffer.len() * elem_size;
            }
        }

        PoolStats {
            hits: self.hits,
            misses: self.misses,
            total_allocations: self.total_allocations,
            total_releases: self.total_releases,
            hit_rate,
            unique_sizes: self.buffers.values().filter(|v| !v.is_empty()).count(),
            total_bytes_pooled,
            total_buffers_pooled,
        }
    }

    fn clear(&mut self) {
        self.buffers.clear();
        self.hits = 0;
        self.misses = 0;
        self.total_allocations = 0;
        self.total_releases = 0;
    }
}

/// Thread-safe pool of scalar buffers shared by every pooled segment of a context
pub struct SegmentPool {
    inner: Mutex<FreeLists>,
}

impl SegmentPool {
    /// Create a pool with the given configuration
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Mutex::new(FreeLists::new(config)),
        }
    }

    /// Check out a buffer of `size` elements
    pub fn acquire(&self, size: usize, zeroed: bool) -> Vec<Scalar> {
        self.inner.lock().acquire(size, zeroed)
    }

    /// Hand a buffer back for reuse
    pub fn release(&self, buffer: Vec<Scalar>) {
        self.inner.lock().release(buffer);
    }

    /// Current statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// Drop every idle buffer and reset counters
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Active configuration
    pub fn config(&self) -> PoolConfig {
        self.inner.lock().config
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_miss_then_hit() {
        let pool = SegmentPool::default();

        let buffer = pool.acquire(8, true);
        assert_eq!(buffer.len(), 8);
        pool.release(buffer);

        let reused = pool.acquire(8, false);
        assert_eq!(reused.len(), 8);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_releases, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zeroed_reuse_clears_contents() {
        let pool = SegmentPool::default();
        let mut buffer = pool.acquire(4, true);
        buffer.fill(7.0);
        pool.release(buffer);

        let dirty = pool.acquire(4, false);
        assert_eq!(dirty, vec![7.0; 4]);
        pool.release(dirty);

        let clean = pool.acquire(4, true);
        assert_eq!(clean, vec![0.0; 4]);
    }

    #[test]
    fn test_sizes_are_kept_apart() {
        let pool = SegmentPool::default();
        pool.release(vec![0.0; 3]);

        let _ = pool.acquire(4, true);
        let stats = pool.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.total_buffers_pooled, 1);
        assert_eq!(stats.total_bytes_pooled, 3 * std::mem::size_of::<Scalar>());
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = SegmentPool::new(PoolConfig {
            enabled: true,
            max_buffers_per_size: 2,
        });
        for _ in 0..5 {
            pool.release(vec![0.0; 10]);
        }
        assert_eq!(pool.stats().total_buffers_pooled, 2);
    }

    #[test]
    fn test_disabled_pool_never_reuses() {
        let pool = SegmentPool::new(PoolConfig {
            enabled: false,
            ..PoolConfig::default()
        });
        pool.release(vec![1.0; 5]);
        let buffer = pool.acquire(5, false);
        assert_eq!(buffer, vec![0.0; 5]);
        assert_eq!(pool.stats().hits, 0);
    }

    #[test]
    fn test_clear_resets() {
        let pool = SegmentPool::default();
        pool.release(vec![0.0; 2]);
        let _ = pool.acquire(9, true);
        pool.clear();

        let stats = pool.stats();
        assert_eq!(stats.total_allocations, 0);
        assert_eq!(stats.total_buffers_pooled, 0);
    }
}
