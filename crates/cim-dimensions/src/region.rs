//! Sky regions
//!
//! Regions are longitude/latitude boxes in degrees. Boxes do not wrap at
//! longitude 0/360.

use serde::{Deserialize, Serialize};

/// A longitude/latitude box on the sky, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl Region {
    /// Create a box from its bounds
    #[inline]
    #[must_use]
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    /// A box centered on a point with the given half-widths
    #[inline]
    #[must_use]
    pub fn centered(lon: f64, lat: f64, half_lon: f64, half_lat: f64) -> Self {
        Self::new(lon - half_lon, lon + half_lon, lat - half_lat, lat + half_lat)
    }

    /// Smallest box containing both
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            lon_min: self.lon_min.min(other.lon_min),
            lon_max: self.lon_max.max(other.lon_max),
            lat_min: self.lat_min.min(other.lat_min),
            lat_max: self.lat_max.max(other.lat_max),
        }
    }

    /// Overlap of two boxes, `None` when they are disjoint
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let region = Self {
            lon_min: self.lon_min.max(other.lon_min),
            lon_max: self.lon_max.min(other.lon_max),
            lat_min: self.lat_min.max(other.lat_min),
            lat_max: self.lat_max.min(other.lat_max),
        };
        (region.lon_min <= region.lon_max && region.lat_min <= region.lat_max).then_some(region)
    }

    /// Whether the boxes share at least one point
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.intersection(other).is_some()
    }

    /// Whether the point lies inside or on the boundary
    #[inline]
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }

    /// Center point as `(lon, lat)`
    #[inline]
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lon_min + self.lon_max) / 2.0,
            (self.lat_min + self.lat_max) / 2.0,
        )
    }

    /// Union over an iterator of regions; `None` for an empty iterator
    pub fn union_all<'a, I>(regions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Region>,
    {
        regions
            .into_iter()
            .fold(None, |acc: Option<Region>, region| {
                Some(acc.map_or(*region, |bounds| bounds.union(region)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_covers_both() {
        let a = Region::new(0.0, 1.0, 0.0, 1.0);
        let b = Region::new(2.0, 3.0, -1.0, 0.5);
        let u = a.union(&b);
        assert_eq!(u, Region::new(0.0, 3.0, -1.0, 1.0));
    }

    #[test]
    fn disjoint_boxes_do_not_intersect() {
        let a = Region::new(0.0, 1.0, 0.0, 1.0);
        let b = Region::new(2.0, 3.0, 0.0, 1.0);
        assert!(a.intersection(&b).is_none());
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn intersection_is_contained_in_both() {
        let a = Region::new(0.0, 2.0, 0.0, 2.0);
        let b = Region::new(1.0, 3.0, 1.0, 3.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Region::new(1.0, 2.0, 1.0, 2.0));
    }

    #[test]
    fn union_all_of_nothing() {
        assert!(Region::union_all(std::iter::empty()).is_none());
        let regions = [Region::centered(10.0, 0.0, 1.0, 1.0), Region::centered(12.0, 0.0, 1.0, 1.0)];
        assert_eq!(
            Region::union_all(regions.iter()),
            Some(Region::new(9.0, 13.0, -1.0, 1.0))
        );
    }
}
