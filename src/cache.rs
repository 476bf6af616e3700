use geo::{Coord, MultiPolygon};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Recently fetched isochrones keyed by rounded coordinate, so facilities
/// sharing an address cost a single request.
pub struct IsochroneCache {
    entries: LruCache<(i64, i64), MultiPolygon<f64>>,
}

// 1e-7 degrees is about 1 cm
const KEY_SCALE: f64 = 1e7;

fn cache_key(location: Coord<f64>) -> (i64, i64) {
    (
        (location.x * KEY_SCALE).round() as i64,
        (location.y * KEY_SCALE).round() as i64,
    )
}

impl IsochroneCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn check_cache(&mut self, location: Coord<f64>) -> Option<MultiPolygon<f64>> {
        self.entries.get(&cache_key(location)).cloned()
    }

    pub fn insert_into_cache(&mut self, location: Coord<f64>, isochrone: MultiPolygon<f64>) {
        self.entries.put(cache_key(location), isochrone);
    }
}
