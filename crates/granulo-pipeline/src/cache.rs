//! Memoization of analysis results keyed by image content and parameters.
//!
//! Keys are SHA-256 digests over the raster (dimensions, channel layout
//! and pixels), the segmentation strategy fingerprint, and a canonical
//! JSON rendering of the full [`AnalysisConfig`] with object keys sorted,
//! so field order never changes a key.
//!
//! [`ResultCache::get_or_compute`] runs at most one computation per key
//! at a time: concurrent callers with the same key wait for the in-flight
//! computation and share its outcome. Computations run outside the cache
//! lock, so unrelated keys proceed in parallel. Failed computations are
//! handed to every waiter but never stored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{AnalysisConfig, AnalysisError, AnalysisResult, RasterImage, Stage};

/// Bumped whenever the key layout or result semantics change.
const KEY_DOMAIN: &[u8] = b"granulo/analysis-cache/v1\0";

/// Content digest identifying one (image, strategy, config) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for analysing `image` with the strategy identified
    /// by `fingerprint` under `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::ComputationFailure`] if the configuration
    /// cannot be serialized.
    pub fn derive(
        image: &RasterImage,
        fingerprint: &str,
        config: &AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let value = serde_json::to_value(config).map_err(|e| {
            AnalysisError::computation(Stage::Cache, format!("failed to serialize config: {e}"))
        })?;
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update([image.channels()]);
        hasher.update((image.pixels().len() as u64).to_le_bytes());
        hasher.update(image.pixels());
        hasher.update((fingerprint.len() as u64).to_le_bytes());
        hasher.update(fingerprint.as_bytes());
        hasher.update((canonical.len() as u64).to_le_bytes());
        hasher.update(canonical.as_bytes());
        Ok(Self(hasher.finalize().into()))
    }

    /// The raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Serialize `value` as JSON with every object's keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

/// Bounds on what a [`ResultCache`] retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Most results kept at once.
    pub max_entries: usize,
    /// Most estimated bytes kept at once.
    pub max_bytes: usize,
}

impl CacheLimits {
    /// Default entry bound.
    pub const DEFAULT_MAX_ENTRIES: usize = 64;
    /// Default byte budget (256 MiB).
    pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }
}

/// Counters describing cache activity since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a stored entry.
    pub hits: u64,
    /// Lookups that joined another caller's in-flight computation.
    pub shared: u64,
    /// Lookups that had to compute.
    pub misses: u64,
    /// Computations that finished (successfully or not).
    pub computations: u64,
    /// Entries removed to respect the limits.
    pub evictions: u64,
    /// Entries currently stored.
    pub entries: usize,
    /// Estimated bytes currently stored.
    pub bytes: usize,
}

type Outcome = Result<Arc<AnalysisResult>, AnalysisError>;

/// A computation other callers can wait on.
struct InFlight {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Outcome) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut guard = self.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut guard);
        }
    }
}

struct Entry {
    result: Arc<AnalysisResult>,
    bytes: usize,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Entry>,
    in_flight: HashMap<CacheKey, Arc<InFlight>>,
    clock: u64,
    bytes: usize,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&mut self, key: &CacheKey) -> Option<Arc<AnalysisResult>> {
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        let result = Arc::clone(&entry.result);
        self.stats.hits += 1;
        Some(result)
    }

    fn insert(&mut self, key: CacheKey, result: Arc<AnalysisResult>, limits: CacheLimits) {
        let bytes = result.estimated_bytes();
        let last_used = self.tick();
        if let Some(old) = self.entries.insert(
            key,
            Entry {
                result,
                bytes,
                last_used,
            },
        ) {
            self.bytes -= old.bytes;
        }
        self.bytes += bytes;

        while self.entries.len() > limits.max_entries || self.bytes > limits.max_bytes {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k)
            else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&victim) {
                self.bytes -= evicted.bytes;
                self.stats.evictions += 1;
                log::info!("cache: evicted {victim} ({} bytes)", evicted.bytes);
            }
        }
    }
}

/// Completes an in-flight computation with a failure if the computing
/// closure unwinds, so waiters are never stranded.
struct FlightGuard<'a> {
    cache: &'a ResultCache,
    key: CacheKey,
    flight: Arc<InFlight>,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cache.state.lock().in_flight.remove(&self.key);
        self.flight.complete(Err(AnalysisError::computation(
            Stage::Cache,
            format!("computation for {} did not complete", self.key),
        )));
    }
}

/// In-memory LRU cache of [`AnalysisResult`]s.
///
/// Share it between threads by reference or behind an `Arc`.
pub struct ResultCache {
    state: Mutex<CacheState>,
    limits: CacheLimits,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("limits", &self.limits)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Create an empty cache with the given bounds.
    #[must_use]
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            limits,
        }
    }

    /// The configured bounds.
    #[must_use]
    pub const fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Return the stored result for `key`, or run `compute` to produce it.
    ///
    /// If another caller is already computing `key`, this call blocks
    /// until that computation finishes and returns its outcome instead of
    /// computing again. Errors are returned to every waiting caller and
    /// leave the cache without an entry for `key`.
    ///
    /// # Errors
    ///
    /// Whatever `compute` (or the shared in-flight computation) returned.
    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Outcome
    where
        F: FnOnce() -> Result<AnalysisResult, AnalysisError>,
    {
        let flight = {
            let mut state = self.state.lock();
            if let Some(hit) = state.lookup(&key) {
                log::debug!("cache: hit {key}");
                return Ok(hit);
            }
            if let Some(existing) = state.in_flight.get(&key).map(Arc::clone) {
                state.stats.shared += 1;
                drop(state);
                log::debug!("cache: waiting on in-flight computation {key}");
                return existing.wait();
            }
            state.stats.misses += 1;
            let flight = Arc::new(InFlight::new());
            state.in_flight.insert(key, Arc::clone(&flight));
            flight
        };

        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            armed: true,
        };

        log::info!("cache: computing {key}");
        let outcome = compute().map(Arc::new);

        {
            let mut state = self.state.lock();
            state.in_flight.remove(&key);
            state.stats.computations += 1;
            if let Ok(result) = &outcome {
                state.insert(key, Arc::clone(result), self.limits);
            }
        }
        guard.flight.complete(outcome.clone());
        guard.armed = false;
        outcome
    }

    /// The stored result for `key`, if any. Counts as a use for LRU order.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<AnalysisResult>> {
        self.state.lock().lookup(key)
    }

    /// Returns `true` if a result for `key` is stored.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Remove every stored result. In-flight computations are unaffected
    /// and store their results when they finish.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.bytes = 0;
        log::info!("cache: cleared {removed} entries");
    }

    /// Snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            ..state.stats
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, mpsc};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::types::{Dimensions, Histogram, Metric, RejectionCounts};

    fn result(accepted: usize) -> AnalysisResult {
        AnalysisResult {
            dimensions: Dimensions {
                width: 1,
                height: 1,
            },
            accepted_count: accepted,
            rejected: RejectionCounts::default(),
            records: Vec::new(),
            metric: Metric::default(),
            calibration: None,
            statistics: None,
            histogram: Histogram::default(),
            classification: Vec::new(),
            maintenance: crate::stats::assess_maintenance(None),
        }
    }

    fn raster(seed: u8) -> RasterImage {
        RasterImage::new(2, 2, 1, vec![seed, 0, 0, 0]).unwrap()
    }

    fn key(seed: u8) -> CacheKey {
        CacheKey::derive(&raster(seed), "test", &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn key_is_deterministic() {
        assert_eq!(key(1), key(1));
        assert_eq!(key(1).to_string().len(), 64);
    }

    #[test]
    fn key_depends_on_pixels_dimensions_and_parameters() {
        let base = key(1);
        assert_ne!(base, key(2));

        let reshaped = RasterImage::new(4, 1, 1, vec![1, 0, 0, 0]).unwrap();
        assert_ne!(
            base,
            CacheKey::derive(&reshaped, "test", &AnalysisConfig::default()).unwrap()
        );

        let mut config = AnalysisConfig::default();
        config.segmentation.min_contour_area += 1.0;
        assert_ne!(base, CacheKey::derive(&raster(1), "test", &config).unwrap());

        let mut config = AnalysisConfig::default();
        config.aggregation.histogram_bins = 7;
        assert_ne!(base, CacheKey::derive(&raster(1), "test", &config).unwrap());

        assert_ne!(
            base,
            CacheKey::derive(&raster(1), "other", &AnalysisConfig::default()).unwrap()
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":[1,{"z":0,"y":1}],"c":null}}"#)
            .unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"c":null,"d":[1,{"y":1,"z":0}]},"b":1}"#)
            .unwrap();
        let (mut sa, mut sb) = (String::new(), String::new());
        write_canonical(&a, &mut sa);
        write_canonical(&b, &mut sb);
        assert_eq!(sa, sb);
        assert_eq!(sa, r#"{"a":{"c":null,"d":[1,{"y":1,"z":0}]},"b":1}"#);
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let cache = ResultCache::default();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let r = cache
                .get_or_compute(key(1), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result(4))
                })
                .unwrap();
            assert_eq!(r.accepted_count, 4);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = ResultCache::default();
        let err = cache
            .get_or_compute(key(1), || {
                Err(AnalysisError::computation(Stage::Measurement, "boom"))
            })
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Measurement));
        assert!(cache.is_empty());

        let ok = cache.get_or_compute(key(1), || Ok(result(1))).unwrap();
        assert_eq!(ok.accepted_count, 1);
        assert_eq!(cache.stats().computations, 2);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = ResultCache::new(CacheLimits {
            max_entries: 2,
            max_bytes: usize::MAX,
        });
        cache.get_or_compute(key(1), || Ok(result(1))).unwrap();
        cache.get_or_compute(key(2), || Ok(result(2))).unwrap();
        // Touch 1 so 2 becomes the oldest.
        assert!(cache.get(&key(1)).is_some());
        cache.get_or_compute(key(3), || Ok(result(3))).unwrap();

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn byte_budget_is_enforced() {
        let one = result(0).estimated_bytes();
        let cache = ResultCache::new(CacheLimits {
            max_entries: 100,
            max_bytes: one * 2,
        });
        for seed in 0..5 {
            cache.get_or_compute(key(seed), || Ok(result(0))).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.stats().bytes <= one * 2);
        assert!(cache.contains(&key(4)));
    }

    #[test]
    fn clear_removes_everything() {
        let cache = ResultCache::default();
        cache.get_or_compute(key(1), || Ok(result(1))).unwrap();
        cache.get_or_compute(key(2), || Ok(result(2))).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes, 0);
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let cache = ResultCache::default();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_compute(key(9), || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(50));
                                Ok(result(9))
                            })
                            .unwrap()
                    })
                })
                .collect();
            for h in handles {
                assert_eq!(h.join().unwrap().accepted_count, 9);
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.shared, 7);
    }

    #[test]
    fn unrelated_keys_compute_in_parallel() {
        // Each computation waits for the other to start; serialized
        // execution would time out instead.
        let cache = &ResultCache::default();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();

        thread::scope(|s| {
            let a = s.spawn(move || {
                cache.get_or_compute(key(1), || {
                    tx_a.send(()).unwrap();
                    rx_b.recv_timeout(Duration::from_secs(5))
                        .map_err(|_| AnalysisError::computation(Stage::Cache, "serialized"))?;
                    Ok(result(1))
                })
            });
            let b = s.spawn(move || {
                cache.get_or_compute(key(2), || {
                    tx_b.send(()).unwrap();
                    rx_a.recv_timeout(Duration::from_secs(5))
                        .map_err(|_| AnalysisError::computation(Stage::Cache, "serialized"))?;
                    Ok(result(2))
                })
            });
            assert!(a.join().unwrap().is_ok());
            assert!(b.join().unwrap().is_ok());
        });
    }

    #[test]
    fn panicking_computation_releases_waiters() {
        let cache = ResultCache::default();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.get_or_compute(key(5), || panic!("compute exploded"))
        }));
        assert!(outcome.is_err());
        // The key is free again.
        let r = cache.get_or_compute(key(5), || Ok(result(5))).unwrap();
        assert_eq!(r.accepted_count, 5);
    }
}
