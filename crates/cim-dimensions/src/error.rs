//! Error types for the dimension data model

use crate::set::DimensionSet;

/// Errors raised while defining a universe or building coordinates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DimensionError {
    /// Name not defined in the universe
    #[error("unknown dimension {0:?}")]
    UnknownDimension(String),

    /// Name defined twice
    #[error("dimension {0:?} is defined more than once")]
    DuplicateDimension(String),

    /// A dependency must be defined before the dimension that names it
    #[error("dimension {dimension:?} depends on {dependency:?}, which is not defined before it")]
    DependencyOrder {
        /// The dependent dimension
        dimension: String,
        /// The dependency that was not yet defined
        dependency: String,
    },

    /// Coordinate values do not cover exactly the declared dimensions
    #[error("coordinate keys {actual} do not match dimensions {expected}")]
    KeyMismatch {
        /// Declared dimensions
        expected: DimensionSet,
        /// Keys actually supplied
        actual: DimensionSet,
    },

    /// Projection target is not contained in the source dimensions
    #[error("cannot project coordinate over {source_dimensions} onto {target}")]
    NotASubset {
        /// Dimensions of the coordinate being projected
        source_dimensions: DimensionSet,
        /// Requested target dimensions
        target: DimensionSet,
    },

    /// Pixel index outside the pixelization's index space
    #[error("index {index} is outside the {dimension:?} pixelization")]
    PixelOutOfRange {
        /// Skypix dimension name
        dimension: String,
        /// Offending index
        index: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mismatch_display() {
        let err = DimensionError::KeyMismatch {
            expected: DimensionSet::from_names(["a", "b"]),
            actual: DimensionSet::from_names(["a"]),
        };
        assert_eq!(
            err.to_string(),
            "coordinate keys {a} do not match dimensions {a, b}"
        );
    }
}
