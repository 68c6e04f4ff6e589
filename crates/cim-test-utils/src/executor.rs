//! In-process executor
//!
//! Each quantum "runs" by writing a mock dataset for every output, with its
//! task, data ID and input dataset IDs recorded as provenance. Failure
//! directives carried by the plan decide which quanta fail and how.
//!
//! Direct execution writes into the catalog as it goes. Detached execution
//! only reads the catalog; outputs go to a staging file inside the
//! repository until [`Executor::transfer_back`] merges them in.

use cim_build::{
    first_firing, BuildError, ExecOptions, Executor, ExitStatus, FailureKind, PlannedDataset, QuantumPlan,
};
use cim_catalog::{Catalog, CollectionKind, DatasetType, LocalCatalog, MockDataset, MockQuantum};
use cim_dimensions::{DataCoordinate, DimensionUniverse};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

const EXECUTOR: &str = "executor";

/// Directory under the repository root holding detached outputs
pub const STAGING_DIR: &str = "staging";

/// Counts of what happened to a plan's quanta in one execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionTally {
    pub succeeded: usize,
    /// Already complete in the output run
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl ExecutionTally {
    #[must_use]
    pub fn status(&self) -> ExitStatus {
        if self.failed + self.blocked == 0 {
            ExitStatus::SUCCESS
        } else {
            ExitStatus::FAILURE
        }
    }
}

/// Where quanta read inputs from and write outputs to
trait QuantumStore {
    fn find_input(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<Option<Uuid>, BuildError>;

    fn has_output(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<bool, BuildError>;

    /// Remove an existing output; `false` if it has to stay
    fn clear_output(&mut self, dataset_type: &str, data_id: &DataCoordinate, clobber: bool)
        -> Result<bool, BuildError>;

    fn write(
        &mut self,
        payload: MockDataset,
        dataset_type: &DatasetType,
        data_id: &DataCoordinate,
    ) -> Result<Uuid, BuildError>;
}

fn run_quanta<S: QuantumStore>(
    store: &mut S,
    plan: &QuantumPlan,
    options: &ExecOptions,
) -> Result<ExecutionTally, BuildError> {
    let mut tally = ExecutionTally::default();
    for quantum in &plan.quanta {
        let Some(metadata) = quantum.metadata() else {
            continue;
        };
        if store.has_output(&metadata.dataset_type.name, &metadata.data_id)? {
            tally.skipped += 1;
            continue;
        }

        let mut inputs = Vec::with_capacity(quantum.inputs.len());
        let mut missing = None;
        for input in &quantum.inputs {
            match store.find_input(&input.dataset_type.name, &input.data_id)? {
                Some(id) => inputs.push(id),
                None => {
                    missing = Some(input);
                    break;
                }
            }
        }
        if let Some(input) = missing {
            warn!(
                task = %quantum.task,
                data_id = %quantum.data_id,
                input = %input.dataset_type.name,
                "quantum blocked by missing input"
            );
            tally.blocked += 1;
            continue;
        }

        let mut kept = None;
        for product in quantum.products() {
            let (name, data_id) = (&product.dataset_type.name, &product.data_id);
            if store.has_output(name, data_id)? && !store.clear_output(name, data_id, options.clobber_outputs)? {
                kept = Some(product);
                break;
            }
        }
        if let Some(product) = kept {
            error!(
                task = %quantum.task,
                data_id = %quantum.data_id,
                output = %product.dataset_type.name,
                "output already exists in the output run"
            );
            tally.failed += 1;
            continue;
        }

        let provenance = MockQuantum {
            task: quantum.task.clone(),
            data_id: quantum.data_id.clone(),
            inputs,
        };
        match first_firing(&plan.failures, &quantum.task, &quantum.data_id, options.memory_per_quantum) {
            Some(directive) if directive.kind == FailureKind::PartialOutputs => {
                if let Some(first) = quantum.products().first() {
                    write_output(store, &plan.output_run, &provenance, first)?;
                }
                if options.raise_on_partial_outputs {
                    warn!(task = %quantum.task, data_id = %quantum.data_id, "partial outputs treated as failure");
                    tally.failed += 1;
                    continue;
                }
                write_output(store, &plan.output_run, &provenance, metadata)?;
                tally.succeeded += 1;
            }
            Some(directive) => {
                warn!(task = %quantum.task, data_id = %quantum.data_id, %directive, "simulated failure");
                tally.failed += 1;
            }
            None => {
                for output in &quantum.outputs {
                    write_output(store, &plan.output_run, &provenance, output)?;
                }
                tally.succeeded += 1;
            }
        }
    }
    Ok(tally)
}

fn write_output<S: QuantumStore>(
    store: &mut S,
    run: &str,
    provenance: &MockQuantum,
    output: &PlannedDataset,
) -> Result<Uuid, BuildError> {
    let payload = MockDataset::new(&output.dataset_type, &output.data_id, run).with_quantum(provenance.clone());
    store.write(payload, &output.dataset_type, &output.data_id)
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

fn register_output_types<C: Catalog + ?Sized>(catalog: &mut C, plan: &QuantumPlan) -> Result<(), BuildError> {
    for dataset_type in plan.output_types() {
        catalog.register_dataset_type(dataset_type)?;
    }
    Ok(())
}

/// Register the output run and put it at the front of the output chain
fn chain_output_run<C: Catalog + ?Sized>(catalog: &mut C, plan: &QuantumPlan) -> Result<(), BuildError> {
    catalog.register_collection(&plan.output_run, CollectionKind::Run)?;
    let previous = if existing(catalog, &[&plan.output]).is_empty() {
        existing(catalog, &[&plan.input])
    } else {
        catalog.flatten_collection(&plan.output)?
    };
    let mut members = vec![plan.output_run.clone()];
    members.extend(previous.into_iter().filter(|m| m != &plan.output_run));
    catalog.register_collection(&plan.output, CollectionKind::Chained)?;
    catalog.set_collection_chain(&plan.output, &members)?;
    Ok(())
}

struct CatalogStore<'a> {
    catalog: &'a mut LocalCatalog,
    search: Vec<String>,
    run: [String; 1],
}

impl QuantumStore for CatalogStore<'_> {
    fn find_input(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<Option<Uuid>, BuildError> {
        Ok(self
            .catalog
            .find_dataset(dataset_type, data_id, &self.search)?
            .map(|d| d.id))
    }

    fn has_output(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<bool, BuildError> {
        Ok(self.catalog.find_dataset(dataset_type, data_id, &self.run)?.is_some())
    }

    fn clear_output(
        &mut self,
        dataset_type: &str,
        data_id: &DataCoordinate,
        clobber: bool,
    ) -> Result<bool, BuildError> {
        match self.catalog.find_dataset(dataset_type, data_id, &self.run)? {
            None => Ok(true),
            Some(_) if !clobber => Ok(false),
            Some(found) => {
                self.catalog.remove_dataset(&found)?;
                Ok(true)
            }
        }
    }

    fn write(
        &mut self,
        payload: MockDataset,
        dataset_type: &DatasetType,
        data_id: &DataCoordinate,
    ) -> Result<Uuid, BuildError> {
        Ok(self.catalog.put_dataset(payload, dataset_type, data_id, &self.run[0])?.id)
    }
}

/// Outputs of detached execution waiting to be transferred
#[derive(Debug, Default, Serialize, Deserialize)]
struct Staging {
    datasets: Vec<StagedDataset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StagedDataset {
    dataset_type: DatasetType,
    data_id: DataCoordinate,
    payload: MockDataset,
}

impl Staging {
    fn path(repo: &Path, plan: &QuantumPlan) -> PathBuf {
        repo.join(STAGING_DIR)
            .join(format!("{}.json", plan.output_run.replace('/', "_")))
    }

    fn load(path: &Path) -> Result<Self, BuildError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(BuildError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            BuildError::collaborator(EXECUTOR, format!("invalid staging file {}: {e}", path.display()))
        })
    }

    fn save(&self, path: &Path) -> Result<(), BuildError> {
        let io = |source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| BuildError::collaborator(EXECUTOR, format!("cannot encode staging file: {e}")))?;
        std::fs::write(path, bytes).map_err(io)
    }

    fn find(&self, dataset_type: &str, data_id: &DataCoordinate) -> Option<usize> {
        self.datasets
            .iter()
            .position(|s| s.dataset_type.name == dataset_type && &s.data_id == data_id)
    }
}

struct StagedStore<'a> {
    catalog: &'a LocalCatalog,
    search: Vec<String>,
    /// Output run, if the catalog already has it
    run: Option<[String; 1]>,
    output_run: &'a str,
    staging: &'a mut Staging,
}

impl StagedStore<'_> {
    fn in_catalog_run(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<bool, BuildError> {
        match &self.run {
            Some(run) => Ok(self.catalog.find_dataset(dataset_type, data_id, run)?.is_some()),
            None => Ok(false),
        }
    }
}

impl QuantumStore for StagedStore<'_> {
    fn find_input(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<Option<Uuid>, BuildError> {
        if let Some(index) = self.staging.find(dataset_type, data_id) {
            return Ok(self.staging.datasets[index].payload.dataset_id);
        }
        Ok(self
            .catalog
            .find_dataset(dataset_type, data_id, &self.search)?
            .map(|d| d.id))
    }

    fn has_output(&self, dataset_type: &str, data_id: &DataCoordinate) -> Result<bool, BuildError> {
        if self.staging.find(dataset_type, data_id).is_some() {
            return Ok(true);
        }
        self.in_catalog_run(dataset_type, data_id)
    }

    // staged outputs are always replaceable; catalog ones never are
    fn clear_output(
        &mut self,
        dataset_type: &str,
        data_id: &DataCoordinate,
        _clobber: bool,
    ) -> Result<bool, BuildError> {
        if let Some(index) = self.staging.find(dataset_type, data_id) {
            self.staging.datasets.remove(index);
            return Ok(true);
        }
        Ok(!self.in_catalog_run(dataset_type, data_id)?)
    }

    fn write(
        &mut self,
        mut payload: MockDataset,
        dataset_type: &DatasetType,
        data_id: &DataCoordinate,
    ) -> Result<Uuid, BuildError> {
        let id = Uuid::new_v4();
        payload.dataset_id = Some(id);
        payload.run = self.output_run.to_string();
        self.staging.datasets.push(StagedDataset {
            dataset_type: dataset_type.clone(),
            data_id: data_id.clone().with_region(None),
            payload,
        });
        Ok(id)
    }
}

fn open(repo: &Path) -> Result<LocalCatalog, BuildError> {
    Ok(LocalCatalog::open(repo, DimensionUniverse::standard())?)
}

/// Run a plan directly against the repository at `repo`
pub fn execute_direct(repo: &Path, plan: &QuantumPlan, options: &ExecOptions) -> Result<ExecutionTally, BuildError> {
    let mut catalog = open(repo)?;
    if !existing(&catalog, &[&plan.output_run]).is_empty() && !options.extend_run {
        return Err(BuildError::collaborator(
            EXECUTOR,
            format!("output run {} already exists", plan.output_run),
        ));
    }
    register_output_types(&mut catalog, plan)?;
    chain_output_run(&mut catalog, plan)?;

    let search = existing(&catalog, &[&plan.output_run, &plan.output, &plan.input]);
    let mut store = CatalogStore {
        catalog: &mut catalog,
        search,
        run: [plan.output_run.clone()],
    };
    let tally = run_quanta(&mut store, plan, options)?;
    info!(
        output_run = %plan.output_run,
        succeeded = tally.succeeded,
        skipped = tally.skipped,
        failed = tally.failed,
        blocked = tally.blocked,
        "direct execution finished"
    );
    Ok(tally)
}

/// Register the plan's output types and start an empty staging area
pub fn detached_init(repo: &Path, plan: &QuantumPlan) -> Result<(), BuildError> {
    let mut catalog = open(repo)?;
    register_output_types(&mut catalog, plan)?;
    Staging::default().save(&Staging::path(repo, plan))
}

/// Run a plan against the repository without writing to its catalog
pub fn detached_run(repo: &Path, plan: &QuantumPlan, options: &ExecOptions) -> Result<ExecutionTally, BuildError> {
    let catalog = open(repo)?;
    let path = Staging::path(repo, plan);
    let mut staging = Staging::load(&path)?;
    let run = (!existing(&catalog, &[&plan.output_run]).is_empty()).then(|| [plan.output_run.clone()]);
    let mut store = StagedStore {
        search: existing(&catalog, &[&plan.output_run, &plan.output, &plan.input]),
        catalog: &catalog,
        run,
        output_run: &plan.output_run,
        staging: &mut staging,
    };
    let tally = run_quanta(&mut store, plan, options)?;
    staging.save(&path)?;
    info!(
        output_run = %plan.output_run,
        staged = staging.datasets.len(),
        succeeded = tally.succeeded,
        skipped = tally.skipped,
        failed = tally.failed,
        blocked = tally.blocked,
        "detached execution finished"
    );
    Ok(tally)
}

/// Merge staged outputs into the catalog, returning how many were written
pub fn transfer_back(repo: &Path, plan: &QuantumPlan) -> Result<usize, BuildError> {
    let mut catalog = open(repo)?;
    let path = Staging::path(repo, plan);
    let staging = Staging::load(&path)?;
    register_output_types(&mut catalog, plan)?;
    chain_output_run(&mut catalog, plan)?;

    // catalog ids replace staged ones, producers before consumers
    let mut ids: BTreeMap<Uuid, Uuid> = BTreeMap::new();
    for staged in staging.datasets {
        let mut payload = staged.payload;
        let staged_id = payload.dataset_id;
        if let Some(quantum) = payload.quantum.as_mut() {
            for input in &mut quantum.inputs {
                if let Some(stored) = ids.get(input) {
                    *input = *stored;
                }
            }
        }
        let stored = catalog.put_dataset(payload, &staged.dataset_type, &staged.data_id, &plan.output_run)?;
        if let Some(staged_id) = staged_id {
            ids.insert(staged_id, stored.id);
        }
    }
    match std::fs::remove_file(&path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(BuildError::Io { path, source: e });
        }
        _ => {}
    }
    info!(output_run = %plan.output_run, transferred = ids.len(), "transferred detached outputs");
    Ok(ids.len())
}

/// [`Executor`] that simulates task execution in-process
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExecutor;

fn owned(path: &Path) -> PathBuf {
    path.to_path_buf()
}

#[async_trait::async_trait]
impl Executor for SimulatedExecutor {
    async fn execute_direct(
        &self,
        repo: &Path,
        plan: &QuantumPlan,
        options: &ExecOptions,
    ) -> Result<ExitStatus, BuildError> {
        let (repo, plan, options) = (owned(repo), plan.clone(), *options);
        let tally = task::spawn_blocking(move || execute_direct(&repo, &plan, &options)).await??;
        Ok(tally.status())
    }

    async fn detached_init(&self, repo: &Path, plan: &QuantumPlan) -> Result<ExitStatus, BuildError> {
        let (repo, plan) = (owned(repo), plan.clone());
        task::spawn_blocking(move || detached_init(&repo, &plan)).await??;
        Ok(ExitStatus::SUCCESS)
    }

    async fn detached_run(
        &self,
        repo: &Path,
        plan: &QuantumPlan,
        options: &ExecOptions,
    ) -> Result<ExitStatus, BuildError> {
        let (repo, plan, options) = (owned(repo), plan.clone(), *options);
        let tally = task::spawn_blocking(move || detached_run(&repo, &plan, &options)).await??;
        Ok(tally.status())
    }

    async fn transfer_back(&self, repo: &Path, plan: &QuantumPlan) -> Result<ExitStatus, BuildError> {
        let (repo, plan) = (owned(repo), plan.clone());
        task::spawn_blocking(move || transfer_back(&repo, &plan)).await??;
        Ok(ExitStatus::SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{datasets, detectors, open, plan_request, prepared_repo, CI_CHAIN, DETECTORS, EXPOSURES};
    use crate::planner::build_plan;
    use cim_build::FailureDirective;

    const RUN: &str = "HSC/runs/ci/step1";

    fn step1_plan(root: &Path, pipeline: &Path, failure: Option<&str>) -> QuantumPlan {
        let mut request = plan_request(pipeline, &["step1"], RUN);
        request.failures = failure.map(|f| FailureDirective::parse(f).unwrap()).into_iter().collect();
        build_plan(&open(root), &request).unwrap()
    }

    #[test]
    fn failed_quanta_rescued_by_extending_run() {
        let dir = tempfile::tempdir().unwrap();
        let (root, pipeline) = prepared_repo(dir.path());
        let plan = step1_plan(&root, &pipeline, Some("_mock_calibrate:error:detector = 50"));
        assert_eq!(plan.len(), 2 * EXPOSURES * DETECTORS);

        let tally = execute_direct(&root, &plan, &ExecOptions::default()).unwrap();
        assert_eq!(tally.failed, EXPOSURES);
        assert_eq!(tally.status(), ExitStatus::FAILURE);
        let catalog = open(&root);
        assert!(!detectors(&catalog, "_mock_calibrate_metadata", RUN).contains(&50));
        assert_eq!(detectors(&catalog, "_mock_isr_metadata", RUN).len(), EXPOSURES * DETECTORS);
        assert_eq!(catalog.flatten_collection(CI_CHAIN).unwrap()[0], RUN);

        // the run exists now
        assert!(execute_direct(&root, &plan, &ExecOptions::default()).is_err());

        let rescue = QuantumPlan {
            failures: Vec::new(),
            ..plan
        };
        let tally = execute_direct(&root, &rescue, &ExecOptions::default().with_extend_run(true)).unwrap();
        assert_eq!(tally.succeeded, EXPOSURES);
        assert_eq!(tally.skipped, 2 * EXPOSURES * DETECTORS - EXPOSURES);
        let catalog = open(&root);
        assert_eq!(datasets(&catalog, "_mock_src", RUN).len(), EXPOSURES * DETECTORS);
    }

    #[test]
    fn detached_outputs_land_on_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (root, pipeline) = prepared_repo(dir.path());
        let plan = step1_plan(&root, &pipeline, None);

        detached_init(&root, &plan).unwrap();
        let tally = detached_run(&root, &plan, &ExecOptions::default()).unwrap();
        assert_eq!(tally.succeeded, plan.len());
        assert!(datasets(&open(&root), "_mock_calexp", RUN).is_empty());

        // two datasets per isr quantum, three per calibrate quantum
        assert_eq!(transfer_back(&root, &plan).unwrap(), 5 * EXPOSURES * DETECTORS);
        assert!(!Staging::path(&root, &plan).exists());

        let catalog = open(&root);
        assert_eq!(datasets(&catalog, "_mock_calexp", RUN).len(), EXPOSURES * DETECTORS);
        let stored: BTreeSet<Uuid> = catalog.datasets().iter().map(|d| d.id).collect();
        for calexp in datasets(&catalog, "_mock_calexp", RUN) {
            let quantum = catalog.get_dataset(&calexp).unwrap().quantum.unwrap();
            assert_eq!(quantum.task, "_mock_calibrate");
            assert!(quantum.inputs.iter().all(|id| stored.contains(id)));
        }
    }

    #[test]
    fn partial_outputs_keep_first_product() {
        let dir = tempfile::tempdir().unwrap();
        let (root, pipeline) = prepared_repo(dir.path());
        let plan = step1_plan(&root, &pipeline, Some("_mock_calibrate:partial-outputs:detector = 41"));

        let tally = execute_direct(&root, &plan, &ExecOptions::default()).unwrap();
        assert_eq!(tally.status(), ExitStatus::SUCCESS);
        let catalog = open(&root);
        assert!(detectors(&catalog, "_mock_calexp", RUN).contains(&41));
        assert!(!detectors(&catalog, "_mock_src", RUN).contains(&41));
        assert!(detectors(&catalog, "_mock_calibrate_metadata", RUN).contains(&41));
    }

    #[test]
    fn partial_outputs_can_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (root, pipeline) = prepared_repo(dir.path());
        let plan = step1_plan(&root, &pipeline, Some("_mock_calibrate:partial-outputs:detector = 41"));

        let options = ExecOptions::default().with_raise_on_partial_outputs(true);
        let tally = execute_direct(&root, &plan, &options).unwrap();
        assert_eq!(tally.failed, EXPOSURES);
        let catalog = open(&root);
        assert!(detectors(&catalog, "_mock_calexp", RUN).contains(&41));
        assert!(!detectors(&catalog, "_mock_calibrate_metadata", RUN).contains(&41));

        // the leftover product blocks a plain rerun but not a clobbering one
        let rerun = QuantumPlan {
            failures: Vec::new(),
            ..plan
        };
        let extend = ExecOptions::default().with_extend_run(true);
        assert_eq!(execute_direct(&root, &rerun, &extend).unwrap().failed, EXPOSURES);
        let tally = execute_direct(&root, &rerun, &extend.with_clobber_outputs(true)).unwrap();
        assert_eq!(tally.succeeded, EXPOSURES);
        assert_eq!(datasets(&open(&root), "_mock_calexp", RUN).len(), EXPOSURES * DETECTORS);
    }
}
