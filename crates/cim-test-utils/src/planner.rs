//! In-process plan builder
//!
//! Enumerates quanta straight from the repository's dimension records.
//! A quantum is kept when it matches the request's data query, has not
//! already completed in a collection the request skips, and can find every
//! input either in the catalog or among the outputs of quanta planned
//! before it.

use cim_build::{metadata_type_name, BuildError, DataPredicate, PlanBuilder, PlanRequest, PlannedDataset, PlannedQuantum, QuantumPlan};
use cim_catalog::{Catalog, CatalogError, DatasetType, LocalCatalog};
use cim_dimensions::{CoordinateSet, DataCoordinate, DimensionSet, DimensionUniverse, Pixelization};
use cim_mock::{mock_name, PipelineDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::task;
use tracing::{debug, info};

/// Storage class of every task's metadata dataset, before mocking
pub const METADATA_STORAGE_CLASS: &str = "TaskMetadata";

const PLANNER: &str = "planner";

/// [`PlanBuilder`] that reads a [`LocalCatalog`] directly
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedPlanBuilder;

#[async_trait::async_trait]
impl PlanBuilder for SimulatedPlanBuilder {
    async fn build_plan(&self, repo: &Path, request: &PlanRequest) -> Result<QuantumPlan, BuildError> {
        let (repo, request) = (repo.to_path_buf(), request.clone());
        task::spawn_blocking(move || {
            let catalog = LocalCatalog::open(&repo, DimensionUniverse::standard())?;
            build_plan(&catalog, &request)
        })
        .await?
    }
}

fn existing<C: Catalog + ?Sized>(catalog: &C, names: &[&str]) -> Vec<String> {
    let known: BTreeSet<String> = catalog.collections().into_iter().map(|(name, _)| name).collect();
    let mut found: Vec<String> = Vec::new();
    for name in names {
        if known.contains(*name) && !found.iter().any(|f| f == name) {
            found.push((*name).to_string());
        }
    }
    found
}

/// Derive the plan for `request` from `catalog`
pub fn build_plan<C: Catalog + ?Sized>(catalog: &C, request: &PlanRequest) -> Result<QuantumPlan, BuildError> {
    let pipeline = PipelineDefinition::from_path(&request.pipeline)?.mocked(&request.unmocked_dataset_types);
    let labels = pipeline.select(&request.tasks)?;
    let universe = catalog.universe();

    let search = existing(catalog, &[&request.output, &request.input]);
    let mut done_in: Vec<&str> = Vec::new();
    if request.extend_run {
        done_in.push(&request.output_run);
    }
    if let Some(skip) = &request.skip_existing_in {
        done_in.push(skip);
    }
    let done_in = existing(catalog, &done_in);

    let mut plan = QuantumPlan::for_request(request);
    let mut produced: BTreeSet<(String, DataCoordinate)> = BTreeSet::new();
    let (mut skipped, mut pruned) = (0usize, 0usize);

    for label in labels {
        let Some(task) = pipeline.task(label) else {
            return Err(BuildError::collaborator(PLANNER, format!("task {label} is not in the pipeline")));
        };
        let dimensions = universe.extract(&task.dimensions).map_err(CatalogError::from)?;
        let inputs = task
            .inputs
            .values()
            .map(|c| c.resolve(universe))
            .collect::<Result<Vec<_>, _>>()?;
        let mut outputs = task
            .outputs
            .values()
            .map(|c| c.resolve(universe))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(bad) = outputs.iter().find(|o| !o.dimensions.is_subset(&dimensions)) {
            return Err(BuildError::collaborator(
                PLANNER,
                format!("output {} of {label} has dimensions outside the quantum", bad.name),
            ));
        }
        let metadata = metadata_type_name(label);
        outputs.push(DatasetType::new(
            metadata.clone(),
            dimensions.clone(),
            mock_name(METADATA_STORAGE_CLASS),
        ));

        let mut joins = JoinCache::default();
        for quantum_id in catalog.query_coordinates(&dimensions)?.iter() {
            if !request.predicate.matches(quantum_id) {
                continue;
            }
            let data_id = quantum_id.project(&dimensions).map_err(CatalogError::from)?;
            if !done_in.is_empty() && catalog.find_dataset(&metadata, &data_id, &done_in)?.is_some() {
                skipped += 1;
                continue;
            }

            let mut planned_inputs = Vec::new();
            for input in &inputs {
                let ids = joins.inputs(catalog, &search, &request.predicate, input, quantum_id, &dimensions)?;
                for input_id in ids {
                    planned_inputs.push(PlannedDataset {
                        dataset_type: input.clone(),
                        data_id: input_id,
                    });
                }
            }
            let mut available = true;
            for input in &planned_inputs {
                let key = (input.dataset_type.name.clone(), input.data_id.clone());
                if !produced.contains(&key)
                    && catalog
                        .find_dataset(&input.dataset_type.name, &input.data_id, &search)?
                        .is_none()
                {
                    available = false;
                    break;
                }
            }
            if !available {
                debug!(task = label, data_id = %data_id, "inputs unavailable, quantum dropped");
                pruned += 1;
                continue;
            }

            let planned_outputs = outputs
                .iter()
                .map(|output| {
                    Ok(PlannedDataset {
                        dataset_type: output.clone(),
                        data_id: data_id.project(&output.dimensions)?,
                    })
                })
                .collect::<Result<Vec<_>, CatalogError>>()?;
            for output in &planned_outputs {
                produced.insert((output.dataset_type.name.clone(), output.data_id.clone()));
            }
            plan.quanta.push(PlannedQuantum {
                task: label.to_string(),
                data_id,
                inputs: planned_inputs,
                outputs: planned_outputs,
            });
        }
    }

    info!(
        quanta = plan.len(),
        tasks = plan.tasks().len(),
        skipped,
        pruned,
        output_run = %plan.output_run,
        "plan derived"
    );
    Ok(plan)
}

/// Coordinates over task-plus-input dimensions, fetched once per task
#[derive(Default)]
struct JoinCache {
    joined: BTreeMap<DimensionSet, CoordinateSet>,
}

impl JoinCache {
    fn inputs<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        search: &[String],
        predicate: &DataPredicate,
        input: &DatasetType,
        quantum_id: &DataCoordinate,
        quantum_dimensions: &DimensionSet,
    ) -> Result<Vec<DataCoordinate>, BuildError> {
        let universe = catalog.universe();
        if input.dimensions.names().any(|name| universe.is_skypix(name)) {
            return skypix_inputs(catalog, search, input, quantum_id, quantum_dimensions);
        }
        if input.dimensions.is_subset(quantum_dimensions) {
            return Ok(vec![quantum_id.project(&input.dimensions).map_err(CatalogError::from)?]);
        }

        let union = input.dimensions.union(quantum_dimensions);
        if !self.joined.contains_key(&union) {
            let coordinates = catalog.query_coordinates(&union)?;
            self.joined.insert(union.clone(), coordinates);
        }
        let mut found = BTreeSet::new();
        if let Some(joined) = self.joined.get(&union) {
            let related = joined
                .iter()
                .filter(|c| c.matches(quantum_id.values()) && predicate.matches(c));
            for coordinate in related {
                found.insert(coordinate.project(&input.dimensions).map_err(CatalogError::from)?);
            }
        }
        Ok(found.into_iter().collect())
    }
}

/// Existing datasets on skypix cells overlapping the quantum's region
fn skypix_inputs<C: Catalog + ?Sized>(
    catalog: &C,
    search: &[String],
    input: &DatasetType,
    quantum_id: &DataCoordinate,
    quantum_dimensions: &DimensionSet,
) -> Result<Vec<DataCoordinate>, BuildError> {
    let Some(region) = quantum_id.region() else {
        return Err(BuildError::collaborator(
            PLANNER,
            format!("{} is indexed by sky pixel but {quantum_id} has no region", input.name),
        ));
    };
    let universe = catalog.universe();
    let mut found = BTreeSet::new();
    for dataset in catalog.query_datasets(&input.name, search)? {
        let shared_match = dataset
            .data_id
            .values()
            .iter()
            .filter(|(name, _)| quantum_dimensions.contains(name))
            .all(|(name, value)| quantum_id.get(name) == Some(value));
        let overlaps = dataset.data_id.values().iter().all(|(name, value)| {
            match (universe.pixelization(name), value.as_int()) {
                (Some(grid), Some(index)) => u64::try_from(index)
                    .ok()
                    .and_then(|index| grid.cell(index))
                    .is_some_and(|cell| cell.overlaps(region)),
                _ => true,
            }
        });
        if shared_match && overlaps {
            found.insert(dataset.data_id);
        }
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_repo::bootstrap;

    const PIPELINE: &str = r"
tasks:
  isr:
    dimensions: [exposure, detector]
    inputs:
      ccdExposure: {dataset_type: raw, dimensions: [exposure, detector], storage_class: Exposure}
      bias: {dataset_type: bias, dimensions: [detector], storage_class: ExposureF}
    outputs:
      outputExposure: {dataset_type: postISRCCD, dimensions: [exposure, detector], storage_class: Exposure}
  combine:
    dimensions: [exposure]
    inputs:
      exposures: {dataset_type: postISRCCD, dimensions: [exposure, detector], storage_class: Exposure}
    outputs:
      summary: {dataset_type: exposureSummary, dimensions: [exposure], storage_class: DataFrame}
";

    fn request(dir: &Path, predicate: &str) -> PlanRequest {
        let pipeline = dir.join("pipeline.yaml");
        std::fs::write(&pipeline, PIPELINE).unwrap();
        PlanRequest {
            pipeline,
            tasks: Vec::new(),
            predicate: DataPredicate::parse(predicate).unwrap(),
            input: "HSC/defaults".into(),
            output: "HSC/runs/test".into(),
            output_run: "HSC/runs/test/run".into(),
            failures: Vec::new(),
            skip_existing_in: None,
            extend_run: false,
            clobber_outputs: false,
            unmocked_dataset_types: vec!["skyMap".into()],
        }
    }

    #[test]
    fn quanta_follow_records_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        bootstrap(&root, false).unwrap();
        let catalog = LocalCatalog::open(&root, DimensionUniverse::standard()).unwrap();

        let plan = build_plan(&catalog, &request(dir.path(), "")).unwrap();
        assert_eq!(plan.quanta_of("_mock_isr").count(), 24);
        assert_eq!(plan.quanta_of("_mock_combine").count(), 4);
        let combine = plan.quanta_of("_mock_combine").next().unwrap();
        assert_eq!(combine.inputs.len(), 6);
        assert_eq!(combine.metadata().unwrap().dataset_type.name, "_mock_combine_metadata");

        let plan = build_plan(&catalog, &request(dir.path(), "detector = 50")).unwrap();
        assert_eq!(plan.quanta_of("_mock_isr").count(), 4);
        // exposure-level quanta have no detector key; the query narrows
        // their inputs instead
        let combine: Vec<_> = plan.quanta_of("_mock_combine").collect();
        assert_eq!(combine.len(), 4);
        assert!(combine.iter().all(|q| q.inputs.len() == 1));
    }

    #[test]
    fn unknown_selection_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        bootstrap(&root, false).unwrap();
        let catalog = LocalCatalog::open(&root, DimensionUniverse::standard()).unwrap();
        let mut request = request(dir.path(), "");
        request.tasks = vec!["step9".into()];
        assert!(build_plan(&catalog, &request).unwrap_err().is_configuration());
    }
}
