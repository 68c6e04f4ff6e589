//! Bounded-coordinate resolution

use crate::cache::CoordinateCache;
use crate::error::MockError;
use cim_catalog::Catalog;
use cim_dimensions::{CoordinateSet, DimensionSet};
use std::sync::Arc;
use tracing::debug;

/// Resolves boundable dimension sets through the catalog, memoized in a
/// session cache
pub struct BoundedResolver;

impl BoundedResolver {
    /// All coordinates over `dimensions`, fully expanded.
    ///
    /// Queries the catalog at most once per dimension set per cache.
    pub fn resolve<C: Catalog + ?Sized>(
        catalog: &C,
        cache: &mut CoordinateCache,
        dimensions: &DimensionSet,
    ) -> Result<Arc<CoordinateSet>, MockError> {
        if let Some(hit) = cache.get(dimensions) {
            debug!(dimensions = %dimensions, "bounded coordinates cache hit");
            return Ok(hit);
        }
        let coordinates = Arc::new(catalog.query_coordinates(dimensions)?);
        debug!(dimensions = %dimensions, count = coordinates.len(), "resolved bounded coordinates");
        cache.insert(Arc::clone(&coordinates));
        Ok(coordinates)
    }
}
