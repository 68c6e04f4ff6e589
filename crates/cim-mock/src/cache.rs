//! Session-scoped coordinate cache
//!
//! One cache lives for one generation session (a bootstrap or a single
//! `prep-for-pipeline` call). It grows monotonically and is never evicted.
//! It is not synchronized; parallel callers need their own cache or a lock.

use cim_dimensions::{CoordinateSet, DimensionSet, Region};
use std::collections::HashMap;
use std::sync::Arc;

/// Hit/miss counters, for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Fully expanded coordinate sets keyed by exact dimension set
#[derive(Debug, Default)]
pub struct CoordinateCache {
    entries: HashMap<DimensionSet, Arc<CoordinateSet>>,
    /// Outer `None`: not computed yet; inner `None`: the catalog has no
    /// spatial content
    spatial_bounds: Option<Option<Region>>,
    stats: CacheStats,
}

impl CoordinateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached coordinates for exactly `dimensions`
    pub fn get(&mut self, dimensions: &DimensionSet) -> Option<Arc<CoordinateSet>> {
        let found = self.entries.get(dimensions).cloned();
        if found.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        found
    }

    /// Store coordinates under their own dimension set
    pub fn insert(&mut self, coordinates: Arc<CoordinateSet>) {
        self.entries
            .insert(coordinates.dimensions().clone(), coordinates);
    }

    #[must_use]
    pub fn contains(&self, dimensions: &DimensionSet) -> bool {
        self.entries.contains_key(dimensions)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn spatial_bounds(&self) -> Option<Option<Region>> {
        self.spatial_bounds
    }

    pub(crate) fn set_spatial_bounds(&mut self, bounds: Option<Region>) {
        self.spatial_bounds = Some(bounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_by_membership() {
        let mut cache = CoordinateCache::new();
        let dims = DimensionSet::from_names(["tract", "skymap"]);
        cache.insert(Arc::new(CoordinateSet::new(dims)));

        assert!(cache.get(&DimensionSet::from_names(["skymap", "tract"])).is_some());
        assert!(cache.get(&DimensionSet::from_names(["tract"])).is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }
}
