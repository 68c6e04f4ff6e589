//! CIM Catalog
//!
//! The catalog collaborator: dimension records, dataset types, datasets and
//! collections behind the [`Catalog`] trait, a file-backed [`LocalCatalog`]
//! implementation, and tar/gzip repository snapshots.
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_catalog::{Catalog, CollectionKind, LocalCatalog};
//! use cim_dimensions::DimensionUniverse;
//!
//! let mut catalog = LocalCatalog::create("/tmp/repo", DimensionUniverse::standard())?;
//! catalog.register_collection("HSC/misc", CollectionKind::Run)?;
//! let coordinates = catalog.query_coordinates(&catalog.universe().extract(["detector"])?)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod catalog;
mod collection;
mod dataset;
mod error;
mod local;
mod query;
mod record;
pub mod snapshot;

pub use catalog::Catalog;
pub use collection::CollectionKind;
pub use dataset::{DatasetRef, DatasetType, MockDataset, MockQuantum, Registration};
pub use error::CatalogError;
pub use local::{LocalCatalog, CATALOG_FILE};
pub use record::DimensionRecord;
pub use snapshot::{archive_repo, extract_repo, SnapshotError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
