//! CIM Dimensions
//!
//! The key-space data model shared by every other crate in the workspace.
//!
//! # Core Concepts
//!
//! - [`DimensionUniverse`]: the fixed, catalog-defined graph of dimensions
//! - [`DimensionSet`]: an unordered, deduplicated key space, hashable by membership
//! - [`DataCoordinate`]: a value for every dimension in a set, plus an optional region
//! - [`CoordinateSet`]: a deduplicated collection of coordinates over one set
//! - [`Region`]: a longitude/latitude box on the sky
//! - [`Pixelization`]: maps regions to index ranges and indices back to cells
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_dimensions::DimensionUniverse;
//!
//! let universe = DimensionUniverse::standard();
//! let dims = universe.extract(["visit", "detector"])?;
//! assert!(dims.contains("instrument"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod coordinate;
mod error;
mod pixelization;
mod region;
mod set;
mod universe;
mod value;

pub use coordinate::{CoordinateSet, DataCoordinate};
pub use error::DimensionError;
pub use pixelization::{EqualAngleGrid, Pixelization};
pub use region::Region;
pub use set::DimensionSet;
pub use universe::{DimensionDef, DimensionKind, DimensionUniverse, JoinElementDef, SpatialFamily};
pub use value::KeyValue;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn extract_and_build_coordinate() {
        let universe = DimensionUniverse::standard();
        let dims = universe.extract(["detector"]).unwrap();
        let coordinate = DataCoordinate::from_pairs(
            &dims,
            [("instrument", KeyValue::from("HSC")), ("detector", KeyValue::from(42))],
        )
        .unwrap();

        assert_eq!(coordinate.get("detector"), Some(&KeyValue::Int(42)));
        assert!(coordinate.region().is_none());
    }

    #[test]
    fn skypix_cell_round_trip() {
        let universe = DimensionUniverse::standard();
        let grid = universe.pixelization("grid7").unwrap();
        let cell = grid.cell(grid.index_of(149.3, 1.5)).unwrap();

        assert!(cell.contains(149.3, 1.5));
    }
}
