//! Identifier expansion engine
//!
//! Resolves the boundable part of a key space through the catalog, then
//! folds in the skypix dimensions one at a time. Every intermediate
//! frontier is cached, so a later dataset type whose key space matches any
//! of them reuses the result.

use crate::cache::CoordinateCache;
use crate::error::MockError;
use crate::resolve::BoundedResolver;
use crate::spatial::SpatialExpander;
use crate::split::KeySpaceSplitter;
use cim_catalog::Catalog;
use cim_dimensions::{CoordinateSet, DimensionError, DimensionSet, DimensionUniverse, Region};
use std::iter;
use std::sync::Arc;
use tracing::debug;

/// Anchor dimensions whose regions bound coordinates that have no region of
/// their own
const SPATIAL_ANCHORS: [&str; 2] = ["tract", "visit"];

/// Expands dataset key spaces into coordinate sets
#[derive(Debug)]
pub struct ExpansionEngine {
    splitter: KeySpaceSplitter,
    cache: CoordinateCache,
}

impl ExpansionEngine {
    /// Engine with a fresh session cache
    pub fn new(universe: &DimensionUniverse) -> Result<Self, MockError> {
        Ok(Self::with_splitter(KeySpaceSplitter::new(universe)?))
    }

    #[must_use]
    pub fn with_splitter(splitter: KeySpaceSplitter) -> Self {
        Self {
            splitter,
            cache: CoordinateCache::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &CoordinateCache {
        &self.cache
    }

    /// Every coordinate a dataset over `dimensions` must be created for
    pub fn expand_dimensions<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        dimensions: &DimensionSet,
    ) -> Result<Arc<CoordinateSet>, MockError> {
        if let Some(hit) = self.cache.get(dimensions) {
            debug!(dimensions = %dimensions, "expanded coordinates cache hit");
            return Ok(hit);
        }

        let universe = catalog.universe();
        let split = self.splitter.split(universe, dimensions)?;
        let mut frontier = split.boundable;
        let mut coordinates = BoundedResolver::resolve(catalog, &mut self.cache, &frontier)?;

        let mut remaining = split.spatial;
        while let Some(dimension) = remaining.pop_last() {
            let next = universe.extract(frontier.names().chain(iter::once(dimension.as_str())))?;
            if let Some(hit) = self.cache.get(&next) {
                coordinates = hit;
                frontier = next;
                continue;
            }

            let pixelization = universe
                .pixelization(&dimension)
                .ok_or_else(|| DimensionError::UnknownDimension(dimension.clone()))?;
            let fallback = if universe.is_spatial(&frontier) {
                None
            } else {
                self.spatial_bounds(catalog)?
            };
            let expanded = SpatialExpander::new(catalog).expand(
                &coordinates,
                &dimension,
                &pixelization,
                &next,
                fallback,
            )?;
            debug!(
                dimension = %dimension,
                frontier = %next,
                count = expanded.len(),
                "folded skypix dimension"
            );

            coordinates = Arc::new(expanded);
            frontier = next;
            self.cache.insert(Arc::clone(&coordinates));
        }
        Ok(coordinates)
    }

    /// Union of the regions of every tract and visit in the catalog,
    /// computed once per session
    pub fn spatial_bounds<C: Catalog + ?Sized>(&mut self, catalog: &C) -> Result<Option<Region>, MockError> {
        if let Some(bounds) = self.cache.spatial_bounds() {
            return Ok(bounds);
        }
        let mut bounds: Option<Region> = None;
        for anchor in SPATIAL_ANCHORS {
            let dimensions = catalog.universe().extract([anchor])?;
            let coordinates = BoundedResolver::resolve(catalog, &mut self.cache, &dimensions)?;
            let regions = coordinates.iter().filter_map(|c| c.region());
            if let Some(union) = Region::union_all(regions) {
                bounds = Some(bounds.map_or(union, |b| b.union(&union)));
            }
        }
        debug!(?bounds, "computed spatial bounds");
        self.cache.set_spatial_bounds(bounds);
        Ok(bounds)
    }
}
