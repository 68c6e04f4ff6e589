//! Error types for mock generation

use cim_catalog::CatalogError;
use cim_dimensions::DimensionError;
use std::path::PathBuf;

/// Errors raised while expanding key spaces or writing mock datasets
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// A dimension that is neither boundable nor spatially indexed
    #[error("cannot mock unbounded, non-spatial dimension {0}")]
    UnboundedDimension(String),

    /// Catalog collaborator failure
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Invalid dimensions or coordinate
    #[error("dimension error: {0}")]
    Dimension(#[from] DimensionError),

    /// Pipeline definition could not be read
    #[error("failed to read pipeline {}", path.display())]
    PipelineRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pipeline definition could not be parsed
    #[error("invalid pipeline definition: {0}")]
    PipelineParse(#[from] serde_yaml::Error),

    /// Subset or task label not defined by the pipeline
    #[error("pipeline has no task or subset named {0:?}")]
    UnknownLabel(String),
}

impl MockError {
    /// Configuration errors signal a pipeline/schema mismatch and are never
    /// worth retrying
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnboundedDimension(_) | Self::PipelineParse(_) | Self::UnknownLabel(_)
        )
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Catalog(err) if err.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_dimension_message() {
        let err = MockError::UnboundedDimension("day_obs".into());
        assert_eq!(err.to_string(), "cannot mock unbounded, non-spatial dimension day_obs");
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }
}
