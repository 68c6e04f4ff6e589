//! Error types for catalog operations

use cim_dimensions::{DimensionError, DimensionSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Catalog error type
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Invalid dimensions or coordinate
    #[error(transparent)]
    Dimension(#[from] DimensionError),

    /// Same dataset type name, different definition
    #[error("dataset type {name:?} is already registered with a different definition ({existing})")]
    DatasetTypeConflict {
        /// Dataset type name
        name: String,
        /// Summary of the stored definition
        existing: String,
    },

    /// Dataset type was never registered
    #[error("unknown dataset type {0:?}")]
    UnknownDatasetType(String),

    /// Collection was never registered
    #[error("unknown collection {0:?}")]
    UnknownCollection(String),

    /// Collection exists with another kind
    #[error("collection {name:?} is a {actual} collection, not {expected}")]
    CollectionKind {
        name: String,
        expected: String,
        actual: String,
    },

    /// A chain would contain itself
    #[error("collection chain {0:?} contains a cycle")]
    ChainCycle(String),

    /// Second dataset of one type and coordinate in one run
    #[error("dataset {dataset_type} {data_id} already exists in run {run:?}")]
    DatasetConflict {
        dataset_type: String,
        data_id: String,
        run: String,
    },

    /// Dataset id not present in the catalog
    #[error("dataset {0} not found")]
    DatasetNotFound(Uuid),

    /// Query over a dimension the catalog cannot enumerate
    #[error("dimension {0:?} is unbounded and cannot be enumerated")]
    UnboundedQuery(String),

    /// Dimension set missing required or implied dimensions
    #[error("dimension set {0} is not closed over its dependencies")]
    NotClosed(DimensionSet),

    /// No record matches a coordinate
    #[error("no {element} record matches {data_id}")]
    MissingRecord { element: String, data_id: String },

    /// Record keys do not identify a record of the element
    #[error("{element} record has keys {actual}, expected {expected}")]
    RecordKeys {
        element: String,
        expected: DimensionSet,
        actual: DimensionSet,
    },

    /// A coordinate's value disagrees with one implied by a record
    #[error("{element} record implies {dimension} = {implied}, coordinate has {actual}")]
    ImpliedMismatch {
        element: String,
        dimension: String,
        implied: String,
        actual: String,
    },

    /// Regions of two spatial families do not overlap
    #[error("regions of {0} do not overlap")]
    DisjointRegions(String),

    /// No catalog at the given root
    #[error("no repository at {}", .0.display())]
    RepositoryNotFound(PathBuf),

    /// Catalog already present at the given root
    #[error("repository already exists at {}", .0.display())]
    RepositoryExists(PathBuf),

    /// Filesystem failure
    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catalog or payload file could not be (de)serialized
    #[error("malformed JSON at {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CatalogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Filesystem errors may succeed on a later attempt; everything else is
    /// a setup problem the caller must fix
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Whether this reports an attempt to redefine or duplicate existing content
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DatasetTypeConflict { .. } | Self::DatasetConflict { .. } | Self::CollectionKind { .. }
        )
    }
}
