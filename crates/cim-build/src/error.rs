//! Error types for build orchestration

use cim_catalog::{CatalogError, SnapshotError};
use cim_mock::MockError;
use cim_repo::RepoError;
use std::path::PathBuf;

/// Errors raised while assembling or running a build graph
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Data-selection expression could not be parsed
    #[error("invalid data query {query:?}: {reason}")]
    InvalidPredicate { query: String, reason: String },

    /// Failure directive could not be parsed
    #[error("invalid failure directive {directive:?}: {reason}")]
    InvalidDirective { directive: String, reason: String },

    /// Memory size could not be parsed
    #[error("invalid memory size {0:?}")]
    InvalidMemory(String),

    /// Adding a dependency would make the graph cyclic
    #[error("dependency cycle through {0}")]
    CycleDetected(String),

    /// Two targets claim the same output
    #[error("output {} is produced by more than one target", .0.display())]
    DuplicateOutput(PathBuf),

    /// Side stage in extend mode with no earlier stage to extend
    #[error("no earlier stage output run to extend")]
    NothingToExtend,

    /// Collaborator reported a failure that is not an exit status
    #[error("{collaborator} failed: {message}")]
    Collaborator { collaborator: &'static str, message: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("mock error: {0}")]
    Mock(#[from] MockError),

    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plan file {}: {source}", path.display())]
    PlanFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    /// Errors in how the build was described rather than in running it
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::InvalidPredicate { .. }
            | Self::InvalidDirective { .. }
            | Self::InvalidMemory(_)
            | Self::CycleDetected(_)
            | Self::DuplicateOutput(_)
            | Self::NothingToExtend => true,
            Self::Mock(err) => err.is_configuration(),
            _ => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Join(_) => true,
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
    fn configuration_errors_are_not_retryable() {
        let err = BuildError::InvalidDirective {
            directive: "calibrate".into(),
            reason: "expected label:kind:where".into(),
        };
        assert!(err.is_configuration());
        assert!(!err.is_retryable());

        let err = BuildError::io("plan.json", std::io::Error::other("disk full"));
        assert!(!err.is_configuration());
        assert!(err.is_retryable());
    }
}
