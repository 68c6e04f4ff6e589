//! Error types for repository bootstrap

use cim_catalog::CatalogError;
use cim_dimensions::DimensionError;
use cim_mock::MockError;
use std::path::PathBuf;

/// Errors raised while bootstrapping a repository
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("mock error: {0}")]
    Mock(#[from] MockError),

    #[error("dimension error: {0}")]
    Dimension(#[from] DimensionError),

    /// Bundled or regenerated record file is malformed
    #[error("invalid fixture records in {name}: {source}")]
    FixtureData {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Fixture configuration file is malformed
    #[error("invalid fixture config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Fixture configuration could not be serialized
    #[error("failed to serialize fixture config: {0}")]
    ConfigFormat(#[from] toml::ser::Error),

    /// Fixture selection or tiling leaves nothing to build
    #[error("invalid fixture: {0}")]
    InvalidFixture(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RepoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors in the fixture itself rather than the environment
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::FixtureData { .. } | Self::Config { .. } | Self::InvalidFixture(_) | Self::Dimension(_) => true,
            Self::Mock(err) => err.is_configuration(),
            _ => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Catalog(err) => err.is_retryable(),
            Self::Mock(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_errors_are_configuration() {
        let err = RepoError::InvalidFixture("no detectors retained".into());
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid fixture: no detectors retained");
    }
}
