//! Data coordinates and coordinate sets

use crate::error::DimensionError;
use crate::region::Region;
use crate::set::DimensionSet;
use crate::value::KeyValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

/// A value for every dimension in a set, plus an optional region
///
/// Equality, ordering and hashing use the key values only; the region is
/// an attribute, not part of the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCoordinate {
    values: BTreeMap<String, KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<Region>,
}

impl DataCoordinate {
    /// Build a coordinate whose keys are exactly `dimensions`
    pub fn new(
        dimensions: &DimensionSet,
        values: BTreeMap<String, KeyValue>,
    ) -> Result<Self, DimensionError> {
        let actual: DimensionSet = values.keys().cloned().collect();
        if &actual != dimensions {
            return Err(DimensionError::KeyMismatch {
                expected: dimensions.clone(),
                actual,
            });
        }
        Ok(Self {
            values,
            region: None,
        })
    }

    /// Build from `(name, value)` pairs
    pub fn from_pairs<I, S>(dimensions: &DimensionSet, pairs: I) -> Result<Self, DimensionError>
    where
        I: IntoIterator<Item = (S, KeyValue)>,
        S: Into<String>,
    {
        Self::new(
            dimensions,
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )
    }

    /// The coordinate over no dimensions
    #[must_use]
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
            region: None,
        }
    }

    /// Value of one dimension
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KeyValue> {
        self.values.get(name)
    }

    /// All key values, sorted by dimension name
    #[inline]
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, KeyValue> {
        &self.values
    }

    /// The dimensions this coordinate covers
    #[must_use]
    pub fn dimensions(&self) -> DimensionSet {
        self.values.keys().cloned().collect()
    }

    #[inline]
    #[must_use]
    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    /// Attach a region
    #[must_use]
    pub fn with_region(mut self, region: Option<Region>) -> Self {
        self.region = region;
        self
    }

    /// A coordinate with one more key; the region is not carried over
    #[must_use]
    pub fn extended(&self, name: &str, value: KeyValue) -> Self {
        let mut values = self.values.clone();
        values.insert(name.to_string(), value);
        Self {
            values,
            region: None,
        }
    }

    /// Drop every key outside `target`; the region is not carried over
    pub fn project(&self, target: &DimensionSet) -> Result<Self, DimensionError> {
        let source_dimensions = self.dimensions();
        if !target.is_subset(&source_dimensions) {
            return Err(DimensionError::NotASubset {
                source_dimensions,
                target: target.clone(),
            });
        }
        Ok(Self {
            values: self
                .values
                .iter()
                .filter(|(k, _)| target.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            region: None,
        })
    }

    /// Whether every key of `other` has the same value here
    #[must_use]
    pub fn matches(&self, other: &BTreeMap<String, KeyValue>) -> bool {
        other.iter().all(|(k, v)| self.values.get(k) == Some(v))
    }
}

impl PartialEq for DataCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for DataCoordinate {}

impl PartialOrd for DataCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.values.cmp(&other.values)
    }
}

impl Hash for DataCoordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl Display for DataCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// Deduplicated coordinates sharing one dimension set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoordinateSet {
    dimensions: DimensionSet,
    coordinates: BTreeSet<DataCoordinate>,
}

impl CoordinateSet {
    /// Empty set over `dimensions`
    #[must_use]
    pub fn new(dimensions: DimensionSet) -> Self {
        Self {
            dimensions,
            coordinates: BTreeSet::new(),
        }
    }

    /// Collect coordinates, rejecting any whose keys differ from `dimensions`
    pub fn from_coordinates<I>(dimensions: DimensionSet, coordinates: I) -> Result<Self, DimensionError>
    where
        I: IntoIterator<Item = DataCoordinate>,
    {
        let mut set = Self::new(dimensions);
        for coordinate in coordinates {
            set.insert(coordinate)?;
        }
        Ok(set)
    }

    /// Insert a coordinate; `Ok(false)` when an equal one was already present
    pub fn insert(&mut self, coordinate: DataCoordinate) -> Result<bool, DimensionError> {
        let actual = coordinate.dimensions();
        if actual != self.dimensions {
            return Err(DimensionError::KeyMismatch {
                expected: self.dimensions.clone(),
                actual,
            });
        }
        Ok(self.coordinates.insert(coordinate))
    }

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> &DimensionSet {
        &self.dimensions
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    #[must_use]
    pub fn contains(&self, coordinate: &DataCoordinate) -> bool {
        self.coordinates.contains(coordinate)
    }

    /// Coordinates in key order
    pub fn iter(&self) -> impl Iterator<Item = &DataCoordinate> {
        self.coordinates.iter()
    }
}

impl<'a> IntoIterator for &'a CoordinateSet {
    type Item = &'a DataCoordinate;
    type IntoIter = std::collections::btree_set::Iter<'a, DataCoordinate>;

    fn into_iter(self) -> Self::IntoIter {
        self.coordinates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(id: i64) -> DataCoordinate {
        let dims = DimensionSet::from_names(["instrument", "detector"]);
        DataCoordinate::from_pairs(
            &dims,
            [("instrument", KeyValue::from("HSC")), ("detector", KeyValue::from(id))],
        )
        .unwrap()
    }

    #[test]
    fn keys_must_match_dimensions() {
        let dims = DimensionSet::from_names(["instrument", "detector"]);
        let err = DataCoordinate::from_pairs(&dims, [("instrument", KeyValue::from("HSC"))]).unwrap_err();
        assert!(matches!(err, DimensionError::KeyMismatch { .. }));
    }

    #[test]
    fn region_is_not_identity() {
        let a = detector(42);
        let b = detector(42).with_region(Some(Region::new(0.0, 1.0, 0.0, 1.0)));
        assert_eq!(a, b);

        let mut set = CoordinateSet::new(a.dimensions());
        assert!(set.insert(a).unwrap());
        assert!(!set.insert(b).unwrap());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn project_and_extend() {
        let coordinate = detector(50).extended("grid7", KeyValue::from(1234));
        assert_eq!(coordinate.get("grid7"), Some(&KeyValue::Int(1234)));

        let back = coordinate
            .project(&DimensionSet::from_names(["instrument", "detector"]))
            .unwrap();
        assert_eq!(back, detector(50));

        let err = detector(50)
            .project(&DimensionSet::from_names(["visit"]))
            .unwrap_err();
        assert!(matches!(err, DimensionError::NotASubset { .. }));
    }

    #[test]
    fn set_rejects_foreign_coordinates() {
        let mut set = CoordinateSet::new(DimensionSet::from_names(["instrument"]));
        assert!(set.insert(detector(1)).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn display() {
        assert_eq!(detector(7).to_string(), "{detector: 7, instrument: HSC}");
        assert_eq!(DataCoordinate::empty().to_string(), "{}");
    }
}
