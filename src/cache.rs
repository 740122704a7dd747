//! C8 — search result cache: `fingerprint -> (rows, expiresAt)` with TTL +
//! LRU eviction and single-flight de-duplication of concurrent identical
//! queries, backed by `moka`'s sync cache (the same single-flight `get_with`
//! shape used throughout the wider observability-tooling ecosystem).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::model::event::LogEvent;

#[derive(Clone)]
pub struct CachedResult {
    pub rows: Arc<Vec<LogEvent>>,
}

pub struct SearchCache {
    cache: Cache<String, CachedResult>,
    enabled: std::sync::atomic::AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl SearchCache {
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_size).time_to_live(ttl).build(),
            enabled: std::sync::atomic::AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns the cached rows for `fingerprint` if present and reads are
    /// enabled, computing and publishing them with `compute` otherwise.
    /// Concurrent callers with the same fingerprint single-flight: only one
    /// `compute` call runs, and all callers observe the same result — this
    /// holds even while the cache is disabled for reads, since `get_with`
    /// still registers the in-flight computation (§4.8: "enabled toggles
    /// disable reads but not single-flight registration").
    pub fn get_with(&self, fingerprint: String, compute: impl FnOnce() -> Vec<LogEvent>) -> Arc<Vec<LogEvent>> {
        if self.is_enabled() {
            if let Some(hit) = self.cache.get(&fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return hit.rows;
            }
        } else {
            // Reads are disabled, but single-flight registration must still
            // happen: drop any stale entry so `get_with` is forced to recompute
            // rather than silently serving what's already cached.
            self.cache.invalidate(&fingerprint);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = self.cache.get_with(fingerprint, || CachedResult { rows: Arc::new(compute()) });
        result.rows
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<LogEvent> {
        vec![LogEvent::new("s", "x")]
    }

    #[test]
    fn second_lookup_for_same_fingerprint_is_a_hit() {
        let cache = SearchCache::new(100, Duration::from_secs(60));
        let mut calls = 0;
        cache.get_with("q1".into(), || {
            calls += 1;
            sample()
        });
        cache.get_with("q1".into(), || {
            calls += 1;
            sample()
        });
        assert_eq!(calls, 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn disabling_reads_still_registers_single_flight() {
        let cache = SearchCache::new(100, Duration::from_secs(60));
        cache.get_with("q1".into(), sample);
        cache.set_enabled(false);
        let mut calls = 0;
        let rows = cache.get_with("q1".into(), || {
            calls += 1;
            sample()
        });
        assert_eq!(calls, 1, "disabled reads should recompute, not reuse the stale entry");
        assert_eq!(rows.len(), 1);
    }
}
