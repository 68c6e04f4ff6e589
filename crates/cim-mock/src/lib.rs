//! CIM Mock
//!
//! Identifier expansion and mock-dataset materialization.
//!
//! # Architecture
//!
//! ```text
//! KeySpaceSplitter ──► BoundedResolver ──► SpatialExpander
//!         └───────────────┬──────────────────────┘
//!                  ExpansionEngine (session CoordinateCache)
//!                         │
//!                  MockDatasetMaker ──► Catalog
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_mock::{MockDatasetMaker, MISC_INPUT_RUN};
//!
//! let mut maker = MockDatasetMaker::new(&mut catalog)?;
//! maker.make_datasets(&dataset_type, MISC_INPUT_RUN)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod engine;
mod error;
mod maker;
mod naming;
mod pipeline;
mod resolve;
mod spatial;
mod split;

pub use cache::{CacheStats, CoordinateCache};
pub use engine::ExpansionEngine;
pub use error::MockError;
pub use maker::{prep, Materialized, MockDatasetMaker, MISC_INPUT_RUN, UNMOCKED_DATASET_TYPES};
pub use naming::{is_mock_name, mock_name, original_name, MOCK_PREFIX};
pub use pipeline::{Connection, PipelineDefinition, TaskDef};
pub use resolve::BoundedResolver;
pub use spatial::SpatialExpander;
pub use split::{KeySpaceSplitter, SplitDimensions, BOUNDED_DIMENSIONS};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
