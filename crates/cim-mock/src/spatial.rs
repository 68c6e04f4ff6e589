//! Spatial envelope expansion

use crate::error::MockError;
use cim_catalog::Catalog;
use cim_dimensions::{CoordinateSet, DimensionError, DimensionSet, KeyValue, Pixelization, Region};

/// Folds one skypix dimension into a coordinate set
pub struct SpatialExpander<'a, C: ?Sized> {
    catalog: &'a C,
}

impl<'a, C: Catalog + ?Sized> SpatialExpander<'a, C> {
    #[must_use]
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// Cross every coordinate with the cells of `dimension` overlapping its
    /// region, expanding each result to `target` through the catalog.
    ///
    /// Coordinates over a spatial dimension set use their own region; all
    /// others use `fallback`. A coordinate with no region contributes
    /// nothing.
    pub fn expand<P: Pixelization + ?Sized>(
        &self,
        coordinates: &CoordinateSet,
        dimension: &str,
        pixelization: &P,
        target: &DimensionSet,
        fallback: Option<Region>,
    ) -> Result<CoordinateSet, MockError> {
        let spatial = self.catalog.universe().is_spatial(coordinates.dimensions());
        let mut expanded = CoordinateSet::new(target.clone());
        for coordinate in coordinates {
            let region = if spatial {
                coordinate.region().copied()
            } else {
                fallback
            };
            let Some(region) = region else {
                continue;
            };
            for range in pixelization.envelope(&region) {
                for index in range {
                    let value = i64::try_from(index).map_err(|_| DimensionError::PixelOutOfRange {
                        dimension: dimension.to_string(),
                        index: i64::MAX,
                    })?;
                    let extended = coordinate.extended(dimension, KeyValue::Int(value));
                    expanded.insert(self.catalog.expand_coordinate(&extended, target)?)?;
                }
            }
        }
        Ok(expanded)
    }
}
