//! Testing utilities for CIM workspace
//!
//! In-process stand-ins for the external planning and execution tools,
//! a call-counting catalog wrapper, and shared pipeline fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_test_utils::{simulated_runner, write_pipeline};
//!
//! write_pipeline(work_dir);
//! let report = simulated_runner(work_dir).run(&graph).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod counting;
mod executor;
mod fixtures;
mod planner;

pub use counting::CountingCatalog;
pub use executor::{detached_init, detached_run, execute_direct, transfer_back, ExecutionTally, SimulatedExecutor, STAGING_DIR};
pub use fixtures::{
    base_repo, datasets, detectors, extract_snapshot, open, plan_request, prepared_repo, simulated_runner,
    write_pipeline, CI_CHAIN, CI_PIPELINE, CI_PIPELINE_FILE, DETECTORS, EXPOSURES,
};
pub use planner::{build_plan, SimulatedPlanBuilder, METADATA_STORAGE_CLASS};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
