//! CIM Build
//!
//! Build-graph orchestration for staged pipeline runs.
//!
//! [`PipelineCommands`] turns a chain of pipeline stages into build targets:
//! an input snapshot, a quantum plan per stage, and paired direct and
//! detached execution snapshots. [`BuildGraph`] wires targets by their
//! declared outputs and [`BuildRunner`] executes them in dependency order
//! through the [`PlanBuilder`], [`Executor`] and [`RepoTool`] collaborators.
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_build::{base_repo_target, BuildConfig, BuildGraph, PipelineCommands, StageOptions};
//!
//! let targets = PipelineCommands::new("ci", "pipelines/hsc.yaml", "base.tgz", BuildConfig::default())
//!     .add(StageOptions::step("step1").with_failure("_mock_isr:error:detector = 50"))?
//!     .add(StageOptions::step("step2"))?
//!     .finish();
//! let mut graph = BuildGraph::from_targets([base_repo_target("base.tgz")])?;
//! graph.extend(targets)?;
//! let report = runner.run(&graph).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod commands;
mod error;
mod failure;
mod graph;
mod local;
mod plan;
mod predicate;
mod provenance;
mod runner;

pub use commands::{BuildConfig, PipelineCommands, SideStageOptions, StageOptions, DEFAULTS_COLLECTION};
pub use error::BuildError;
pub use failure::{first_firing, parse_memory, FailureDirective, FailureKind};
pub use graph::{base_repo_target, BuildGraph, BuildStep, BuildTarget, TargetId, TargetKind};
pub use local::LocalRepoTool;
pub use plan::{metadata_type_name, ExecOptions, PlanRequest, PlannedDataset, PlannedQuantum, QuantumPlan};
pub use predicate::{DataPredicate, Term};
pub use provenance::{Attempt, ProvenanceSummary, QuantumState, TaskSummary};
pub use runner::{
    BuildReport, BuildRunner, Executor, ExitStatus, PlanBuilder, RepoTool, StepOutcome, TargetOutcome, TargetReport,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
