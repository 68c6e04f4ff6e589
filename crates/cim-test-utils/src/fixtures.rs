//! Pipelines, repositories and runners shared by tests

use crate::executor::SimulatedExecutor;
use crate::planner::SimulatedPlanBuilder;
use cim_build::{BuildRunner, DataPredicate, LocalRepoTool, PlanRequest, DEFAULTS_COLLECTION};
use cim_catalog::{extract_repo, Catalog, CollectionKind, DatasetRef, LocalCatalog};
use cim_dimensions::{DimensionUniverse, KeyValue};
use cim_mock::{MISC_INPUT_RUN, UNMOCKED_DATASET_TYPES};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Two-step single-frame pipeline over the default fixture
///
/// `step1` runs per exposure and detector; `step2` consolidates each
/// exposure and needs a schema dataset that only `prep` provides.
pub const CI_PIPELINE: &str = r"
description: single-frame processing for orchestration tests
tasks:
  isr:
    dimensions: [exposure, detector]
    inputs:
      ccdExposure: {dataset_type: raw, dimensions: [exposure, detector], storage_class: Exposure}
      bias: {dataset_type: bias, dimensions: [detector], storage_class: ExposureF}
      flat: {dataset_type: flat, dimensions: [detector, physical_filter], storage_class: ExposureF}
    outputs:
      outputExposure: {dataset_type: postISRCCD, dimensions: [exposure, detector], storage_class: Exposure}
  calibrate:
    dimensions: [exposure, detector]
    inputs:
      exposure: {dataset_type: postISRCCD, dimensions: [exposure, detector], storage_class: Exposure}
      skyMap: {dataset_type: skyMap, dimensions: [skymap], storage_class: SkyMap}
    outputs:
      calexp: {dataset_type: calexp, dimensions: [exposure, detector], storage_class: ExposureF}
      src: {dataset_type: src, dimensions: [exposure, detector], storage_class: SourceCatalog}
  consolidateSourceTable:
    dimensions: [exposure]
    inputs:
      src: {dataset_type: src, dimensions: [exposure, detector], storage_class: SourceCatalog}
      schema: {dataset_type: sourceTableSchema, dimensions: [], storage_class: DataFrame}
    outputs:
      sourceTable: {dataset_type: sourceTable, dimensions: [exposure], storage_class: DataFrame}
subsets:
  step1: [isr, calibrate]
  step2: [consolidateSourceTable]
";

/// Location of [`CI_PIPELINE`] relative to a work directory
pub const CI_PIPELINE_FILE: &str = "pipelines/ci.yaml";

/// Output chain of [`CI_PIPELINE`] under the default build config
pub const CI_CHAIN: &str = "HSC/runs/ci";

/// Exposures in the default fixture
pub const EXPOSURES: usize = 4;

/// Detectors the default fixture keeps
pub const DETECTORS: usize = 6;

/// Write [`CI_PIPELINE`] under `work_dir`, returning its path
pub fn write_pipeline(work_dir: &Path) -> PathBuf {
    let path = work_dir.join(CI_PIPELINE_FILE);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, CI_PIPELINE).unwrap();
    path
}

pub fn open(root: &Path) -> LocalCatalog {
    LocalCatalog::open(root, DimensionUniverse::standard()).unwrap()
}

/// Default base repository at `dir/base`
pub fn base_repo(dir: &Path) -> PathBuf {
    let root = dir.join("base");
    cim_repo::bootstrap(&root, true).unwrap();
    root
}

/// Base repository with the pipeline's extra inputs and the output chain,
/// as the inputs target leaves it
pub fn prepared_repo(dir: &Path) -> (PathBuf, PathBuf) {
    let root = base_repo(dir);
    let pipeline = write_pipeline(dir);
    cim_mock::prep(&root, &pipeline, MISC_INPUT_RUN).unwrap();
    let mut catalog = open(&root);
    let members = catalog.flatten_collection(DEFAULTS_COLLECTION).unwrap();
    catalog.register_collection(CI_CHAIN, CollectionKind::Chained).unwrap();
    catalog.set_collection_chain(CI_CHAIN, &members).unwrap();
    (root, pipeline)
}

/// Plan request for tasks or subsets of the pipeline at `pipeline`
pub fn plan_request(pipeline: &Path, tasks: &[&str], output_run: &str) -> PlanRequest {
    PlanRequest {
        pipeline: pipeline.to_path_buf(),
        tasks: tasks.iter().map(ToString::to_string).collect(),
        predicate: DataPredicate::all(),
        input: DEFAULTS_COLLECTION.to_string(),
        output: CI_CHAIN.to_string(),
        output_run: output_run.to_string(),
        failures: Vec::new(),
        skip_existing_in: None,
        extend_run: false,
        clobber_outputs: false,
        unmocked_dataset_types: UNMOCKED_DATASET_TYPES.iter().map(ToString::to_string).collect(),
    }
}

/// Runner wired to the in-process planner, executor and repository tool
pub fn simulated_runner(work_dir: &Path) -> BuildRunner {
    BuildRunner::new(
        work_dir,
        Arc::new(SimulatedPlanBuilder),
        Arc::new(SimulatedExecutor),
        Arc::new(LocalRepoTool::default()),
    )
}

/// Unpack a snapshot into `into` and open its catalog
pub fn extract_snapshot(archive: &Path, into: &Path) -> LocalCatalog {
    extract_repo(archive, into).unwrap();
    open(into)
}

/// Datasets of a type in a collection, empty if the collection is unknown
pub fn datasets(catalog: &dyn Catalog, dataset_type: &str, collection: &str) -> Vec<DatasetRef> {
    if !catalog.collections().iter().any(|(name, _)| name == collection) {
        return Vec::new();
    }
    catalog
        .query_datasets(dataset_type, &[collection.to_string()])
        .unwrap()
}

/// Detector values of the datasets of a type in a collection
pub fn detectors(catalog: &dyn Catalog, dataset_type: &str, collection: &str) -> Vec<i64> {
    let mut detectors: Vec<i64> = datasets(catalog, dataset_type, collection)
        .iter()
        .filter_map(|d| d.data_id.get("detector").and_then(KeyValue::as_int))
        .collect();
    detectors.sort_unstable();
    detectors
}
