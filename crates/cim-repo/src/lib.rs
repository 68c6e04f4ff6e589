//! CIM Repo
//!
//! Bootstraps the base repository every pipeline test starts from.
//!
//! Bootstrap runs in a fixed order: instrument records, observation records
//! (with visit regions shrunk to the retained detectors), the sky tiling and
//! its `skyMap` dataset, mock baseline datasets grouped by run, and finally
//! the chained defaults collection over all of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_repo::{FixtureConfig, RepoBootstrapper};
//!
//! let config = FixtureConfig::from_path("fixture.toml".as_ref())?;
//! RepoBootstrapper::new(config).bootstrap("base".as_ref(), true)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod baseline;
mod bootstrap;
mod config;
mod error;
mod records;
mod tiling;

pub use baseline::{baseline_by_run, BaselineRun, BaselineType, BASELINE_DATASET_TYPES};
pub use bootstrap::{bootstrap, BootstrapOutcome, RepoBootstrapper};
pub use config::{FixtureConfig, TilingConfig};
pub use error::RepoError;
pub use records::{
    DetectorInfo, ExposureInfo, InstrumentInfo, InstrumentRecords, ObservationRecords, PhysicalFilterInfo,
    VisitDefinition, VisitDetectorRegion, VisitInfo,
};
pub use tiling::{PatchInfo, SkyTiling, TractInfo, SKYMAP_DATASET_TYPE};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
