//! Spatial pixelization
//!
//! A [`Pixelization`] maps a region to the index ranges of the cells that
//! overlap it (its envelope) and maps an index back to the cell's region.
//! [`EqualAngleGrid`] is the scheme used by the standard universe's skypix
//! dimensions.

use crate::region::Region;
use std::ops::Range;

/// Region-to-index mapping for a skypix dimension
pub trait Pixelization {
    /// Half-open index ranges of every cell that overlaps `region`.
    ///
    /// Ranges are sorted, non-overlapping and non-adjacent.
    fn envelope(&self, region: &Region) -> Vec<Range<u64>>;

    /// The region covered by one cell, `None` if `index` is out of range
    fn cell(&self, index: u64) -> Option<Region>;

    /// Total number of cells
    fn index_count(&self) -> u64;
}

/// Equal-angle grid over the sphere
///
/// Level `n` has `2^n` rows and `2^(n+1)` columns, all `180 / 2^n` degrees
/// wide. Index `row * columns + column`, rows counted from the south pole,
/// columns from longitude 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EqualAngleGrid {
    level: u8,
}

impl EqualAngleGrid {
    /// Highest supported level
    pub const MAX_LEVEL: u8 = 20;

    /// Grid at `level` (clamped to [`Self::MAX_LEVEL`])
    #[inline]
    #[must_use]
    pub fn new(level: u8) -> Self {
        Self {
            level: level.min(Self::MAX_LEVEL),
        }
    }

    /// Grid level
    #[inline]
    #[must_use]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Number of rows
    #[inline]
    #[must_use]
    pub fn rows(&self) -> u64 {
        1u64 << self.level
    }

    /// Number of columns
    #[inline]
    #[must_use]
    pub fn columns(&self) -> u64 {
        1u64 << (self.level + 1)
    }

    /// Cell size in degrees
    #[inline]
    #[must_use]
    pub fn step(&self) -> f64 {
        180.0 / self.rows() as f64
    }

    /// Index of the cell containing a point
    #[must_use]
    pub fn index_of(&self, lon: f64, lat: f64) -> u64 {
        self.row_of(lat) * self.columns() + self.column_of(lon)
    }

    fn row_of(&self, lat: f64) -> u64 {
        clamp_cell((lat + 90.0) / self.step(), self.rows())
    }

    fn column_of(&self, lon: f64) -> u64 {
        clamp_cell(lon / self.step(), self.columns())
    }

    /// Lower edge of cell `k` along an axis starting at `origin`, computed
    /// the same way [`Pixelization::cell`] does
    #[allow(clippy::cast_precision_loss)]
    fn edge(&self, k: u64, origin: f64) -> f64 {
        k as f64 * self.step() + origin
    }

    /// First and last cell along one axis whose extent overlaps
    /// `[min, max]` by more than a shared edge. A degenerate interval lying
    /// on an edge keeps the cell above it.
    fn span(&self, min: f64, max: f64, origin: f64, count: u64) -> (u64, u64) {
        let step = self.step();
        let mut lo = clamp_cell((min - origin) / step, count);
        if lo > 0 && self.edge(lo, origin) > min {
            lo -= 1;
        }
        if lo + 1 < count && self.edge(lo + 1, origin) <= min {
            lo += 1;
        }
        let mut hi = clamp_cell((max - origin) / step, count).max(lo);
        if hi + 1 < count && self.edge(hi + 1, origin) < max {
            hi += 1;
        }
        if hi > lo && self.edge(hi, origin) >= max {
            hi -= 1;
        }
        (lo, hi)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_cell(position: f64, count: u64) -> u64 {
    if position <= 0.0 {
        0
    } else {
        (position.floor() as u64).min(count - 1)
    }
}

impl Pixelization for EqualAngleGrid {
    fn envelope(&self, region: &Region) -> Vec<Range<u64>> {
        let columns = self.columns();
        let (row_lo, row_hi) = self.span(region.lat_min, region.lat_max, -90.0, self.rows());
        let (col_lo, col_hi) = self.span(region.lon_min, region.lon_max, 0.0, columns);

        let mut ranges: Vec<Range<u64>> = Vec::new();
        for row in row_lo..=row_hi {
            let next = (row * columns + col_lo)..(row * columns + col_hi + 1);
            match ranges.last_mut() {
                Some(last) if last.end == next.start => last.end = next.end,
                _ => ranges.push(next),
            }
        }
        ranges
    }

    fn cell(&self, index: u64) -> Option<Region> {
        if index >= self.index_count() {
            return None;
        }
        let step = self.step();
        let row = index / self.columns();
        let column = index % self.columns();
        Some(Region::new(
            self.edge(column, 0.0),
            self.edge(column + 1, 0.0),
            self.edge(row, -90.0),
            self.edge(row + 1, -90.0),
        ))
    }

    fn index_count(&self) -> u64 {
        self.rows() * self.columns()
    }
}
