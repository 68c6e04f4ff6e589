//! Key-space splitting
//!
//! Every dimension of a dataset type must either be bounded by catalog
//! content or be a skypix dimension bounded by the regions of other
//! coordinates. Anything else cannot be mocked.

use crate::error::MockError;
use cim_dimensions::{DimensionError, DimensionSet, DimensionUniverse};
use std::collections::BTreeSet;

/// Dimensions whose values (and those of everything they depend on) come
/// from catalog records
pub const BOUNDED_DIMENSIONS: [&str; 6] = ["exposure", "visit", "detector", "tract", "patch", "band"];

/// A dimension set split into its two mockable halves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDimensions {
    /// Skypix dimensions, folded in one at a time
    pub spatial: BTreeSet<String>,
    /// Boundable dimensions, closed over their dependencies
    pub boundable: DimensionSet,
}

/// Classifies dimensions as boundable or spatially indexed
#[derive(Debug, Clone)]
pub struct KeySpaceSplitter {
    boundable: DimensionSet,
}

impl KeySpaceSplitter {
    /// Splitter bounded by [`BOUNDED_DIMENSIONS`]
    pub fn new(universe: &DimensionUniverse) -> Result<Self, MockError> {
        Self::with_bounded(universe, BOUNDED_DIMENSIONS)
    }

    /// Splitter bounded by the closure of `names`
    pub fn with_bounded<I, S>(universe: &DimensionUniverse, names: I) -> Result<Self, MockError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            boundable: universe.extract(names)?,
        })
    }

    /// Every boundable dimension
    #[inline]
    #[must_use]
    pub fn boundable(&self) -> &DimensionSet {
        &self.boundable
    }

    /// Split `dimensions`, failing on the first dimension that is neither
    /// skypix nor boundable
    pub fn split(
        &self,
        universe: &DimensionUniverse,
        dimensions: &DimensionSet,
    ) -> Result<SplitDimensions, MockError> {
        if let Some(unknown) = dimensions.names().find(|name| universe.get(name).is_none()) {
            return Err(DimensionError::UnknownDimension(unknown.to_string()).into());
        }
        let mut spatial = BTreeSet::new();
        let mut boundable = Vec::new();
        for def in universe.sorted(dimensions) {
            if def.is_skypix() {
                spatial.insert(def.name.clone());
            } else if self.boundable.contains(&def.name) {
                boundable.push(def.name.as_str());
            } else {
                return Err(MockError::UnboundedDimension(def.name.clone()));
            }
        }
        Ok(SplitDimensions {
            spatial,
            boundable: universe.extract(boundable)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_skypix() {
        let universe = DimensionUniverse::standard();
        let splitter = KeySpaceSplitter::new(&universe).unwrap();
        let dims = universe.extract(["visit", "detector", "grid7"]).unwrap();

        let split = splitter.split(&universe, &dims).unwrap();
        assert_eq!(split.spatial, BTreeSet::from(["grid7".to_string()]));
        assert_eq!(split.boundable, universe.extract(["visit", "detector"]).unwrap());
    }

    #[test]
    fn governors_are_boundable() {
        let universe = DimensionUniverse::standard();
        let splitter = KeySpaceSplitter::new(&universe).unwrap();
        assert!(splitter.boundable().contains("instrument"));
        assert!(splitter.boundable().contains("skymap"));
        assert!(splitter.boundable().contains("physical_filter"));

        let only_grid = universe.extract(["grid5"]).unwrap();
        let split = splitter.split(&universe, &only_grid).unwrap();
        assert!(split.boundable.is_empty());
    }

    #[test]
    fn unbounded_dimension_is_fatal() {
        let universe = DimensionUniverse::standard();
        let splitter = KeySpaceSplitter::new(&universe).unwrap();
        let dims = universe.extract(["day_obs"]).unwrap();

        let err = splitter.split(&universe, &dims).unwrap_err();
        assert!(matches!(err, MockError::UnboundedDimension(ref name) if name == "day_obs"));
        assert!(err.is_configuration());
    }
}
