//! Per-tile feature caching in front of data sources.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::Result;
use crate::feature::FeatureList;
use crate::source::{DataSource, DataSourceId};
use crate::tile::TileConfig;

/// Looks up the features a tile needs from a data source.
pub trait FeatureCache: Send + Sync {
    fn fetch(&self, tile: &TileConfig, source: &dyn DataSource) -> Result<FeatureList>;
}

/// Always goes straight to the data source.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCache;

impl FeatureCache for NullCache {
    fn fetch(&self, tile: &TileConfig, source: &dyn DataSource) -> Result<FeatureList> {
        Ok(Arc::new(source.fetch(&tile.padded_envelope)?))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of (source, tile) entries kept.
    pub capacity: usize,
    /// Tiles shallower than this zoom are never cached. They cover huge areas with
    /// huge feature lists and are rarely requested twice.
    pub min_level_to_cache: u8,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            capacity: 500,
            min_level_to_cache: 12,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    source: DataSourceId,
    zoom: u8,
    x: u32,
    y: u32,
}

impl CacheKey {
    fn new(source: &dyn DataSource, tile: &TileConfig) -> CacheKey {
        CacheKey {
            source: source.id(),
            zoom: tile.zoom,
            x: tile.x,
            y: tile.y,
        }
    }
}

/// An entry is inserted before its features are fetched so that concurrent requests for
/// the same key find it and wait on its lock instead of fetching again.
type Slot = Arc<Mutex<SlotState>>;

enum SlotState {
    Empty,
    Ready(FeatureList),
    /// The fetch failed and the slot has left the map. Waiters look the key up again.
    Failed,
}

/// Feature cache bounded by entry count and evicting the least recently accessed entry.
pub struct LruFeatureCache {
    min_level_to_cache: u8,
    entries: Mutex<LruCache<CacheKey, Slot>>,
}

impl LruFeatureCache {
    pub fn new(settings: CacheSettings) -> LruFeatureCache {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        LruFeatureCache {
            min_level_to_cache: settings.min_level_to_cache,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a populated entry exists for the tile, without touching its recency.
    pub fn contains(&self, tile: &TileConfig, source: &dyn DataSource) -> bool {
        let key = CacheKey::new(source, tile);
        let slot = self.entries().peek(&key).cloned();
        slot.map_or(false, |slot| matches!(*lock(&slot), SlotState::Ready(_)))
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<CacheKey, Slot>> {
        lock(&self.entries)
    }

    fn slot(&self, key: CacheKey) -> Slot {
        let mut entries = self.entries();
        entries
            .get_or_insert(key, || Arc::new(Mutex::new(SlotState::Empty)))
            .clone()
    }

    fn forget(&self, key: &CacheKey, slot: &Slot) {
        let mut entries = self.entries();
        if entries.peek(key).map_or(false, |current| Arc::ptr_eq(current, slot)) {
            entries.pop(key);
        }
    }
}

impl Default for LruFeatureCache {
    fn default() -> Self {
        LruFeatureCache::new(CacheSettings::default())
    }
}

impl FeatureCache for LruFeatureCache {
    fn fetch(&self, tile: &TileConfig, source: &dyn DataSource) -> Result<FeatureList> {
        if tile.zoom < self.min_level_to_cache {
            return Ok(Arc::new(source.fetch(&tile.padded_envelope)?));
        }

        let key = CacheKey::new(source, tile);
        loop {
            let slot = self.slot(key);

            // Holding the slot lock across the fetch is what makes concurrent callers wait.
            let mut state = lock(&slot);
            match &*state {
                SlotState::Ready(features) => {
                    trace!(source = %key.source, zoom = key.zoom, x = key.x, y = key.y, "feature cache hit");
                    return Ok(Arc::clone(features));
                }
                SlotState::Failed => continue,
                SlotState::Empty => {}
            }

            debug!(source = %key.source, zoom = key.zoom, x = key.x, y = key.y, "feature cache miss");
            return match source.fetch(&tile.padded_envelope) {
                Ok(fetched) => {
                    let fetched = Arc::new(fetched);
                    *state = SlotState::Ready(Arc::clone(&fetched));
                    Ok(fetched)
                }
                Err(e) => {
                    // Still under the slot lock, so no waiter can fetch into a removed slot.
                    *state = SlotState::Failed;
                    self.forget(&key, &slot);
                    Err(e)
                }
            };
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use geo::point;

    use crate::envelope::Envelope;
    use crate::error::Error;
    use crate::feature::{Feature, FeatureId};
    use crate::source::SourceIdentity;
    use crate::style::LayerConfig;

    struct CountingSource {
        identity: SourceIdentity,
        calls: AtomicUsize,
        fail_first: bool,
        delay: Duration,
    }

    impl CountingSource {
        fn new() -> CountingSource {
            CountingSource {
                identity: SourceIdentity::new(),
                calls: AtomicUsize::new(0),
                fail_first: false,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DataSource for CountingSource {
        fn id(&self) -> DataSourceId {
            self.identity.id()
        }

        fn fetch(&self, _envelope: &Envelope) -> Result<Vec<Feature>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.fail_first && call == 0 {
                return Err(Error::Fetch {
                    source_id: self.id(),
                    message: String::from("connection reset"),
                });
            }
            Ok(vec![Feature::new(
                FeatureId::new(self.id(), call as u32),
                point!(x: 0.0, y: 0.0),
            )])
        }
    }

    fn tile(zoom: u8, x: u32, y: u32) -> TileConfig {
        TileConfig::new(zoom, x, y, 256, Arc::new(LayerConfig::default()))
    }

    fn cache(capacity: usize) -> LruFeatureCache {
        LruFeatureCache::new(CacheSettings {
            capacity,
            min_level_to_cache: 12,
        })
    }

    #[test]
    fn test_concurrent_fetches_populate_once() {
        let source = CountingSource {
            delay: Duration::from_millis(50),
            ..CountingSource::new()
        };
        let cache = cache(10);
        let tile = tile(14, 100, 200);
        let barrier = Barrier::new(8);
        let (cache, tile, source, barrier) = (&cache, &tile, &source, &barrier);

        let results: Vec<FeatureList> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        cache.fetch(tile, source).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(source.calls(), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_shallow_zoom_bypasses_cache() {
        let source = CountingSource::new();
        let cache = cache(10);
        let tile = tile(5, 3, 4);

        for _ in 0..3 {
            cache.fetch(&tile, &source).unwrap();
        }

        assert_eq!(source.calls(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sources_do_not_collide() {
        let a = CountingSource::new();
        let b = CountingSource::new();
        let cache = cache(10);
        let tile = tile(13, 1, 1);

        let from_a = cache.fetch(&tile, &a).unwrap();
        let from_b = cache.fetch(&tile, &b).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(from_a[0].id.source(), a.id());
        assert_eq!(from_b[0].id.source(), b.id());
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let source = CountingSource::new();
        let cache = cache(2);
        let first = tile(12, 0, 0);
        let second = tile(12, 1, 0);
        let third = tile(12, 2, 0);

        cache.fetch(&first, &source).unwrap();
        cache.fetch(&second, &source).unwrap();
        // Reading the first tile again makes the second the eviction candidate.
        cache.fetch(&first, &source).unwrap();
        cache.fetch(&third, &source).unwrap();

        assert_eq!(source.calls(), 3);
        assert!(cache.contains(&first, &source));
        assert!(!cache.contains(&second, &source));
        assert!(cache.contains(&third, &source));
    }

    #[test]
    fn test_failed_fetch_is_not_cached() {
        let source = CountingSource {
            fail_first: true,
            ..CountingSource::new()
        };
        let cache = cache(10);
        let tile = tile(15, 7, 7);

        assert!(matches!(cache.fetch(&tile, &source), Err(Error::Fetch { .. })));
        assert!(!cache.contains(&tile, &source));
        assert!(cache.is_empty());

        let features = cache.fetch(&tile, &source).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(source.calls(), 2);
        assert!(cache.contains(&tile, &source));
    }

    #[test]
    fn test_waiters_on_a_failed_fetch_populate_once() {
        let source = CountingSource {
            fail_first: true,
            delay: Duration::from_millis(50),
            ..CountingSource::new()
        };
        let cache = cache(10);
        let tile = tile(14, 9, 9);
        let (cache, tile, source) = (&cache, &tile, &source);

        let results: Vec<Result<FeatureList>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    scope.spawn(move || {
                        thread::sleep(Duration::from_millis(i * 5));
                        cache.fetch(tile, source)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(source.calls(), 2);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert!(cache.contains(tile, source));
    }

    #[test]
    fn test_null_cache_always_fetches() {
        let source = CountingSource::new();
        let tile = tile(16, 0, 0);

        NullCache.fetch(&tile, &source).unwrap();
        NullCache.fetch(&tile, &source).unwrap();

        assert_eq!(source.calls(), 2);
    }
}
