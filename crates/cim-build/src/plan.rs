//! Execution-plan artifacts
//!
//! A plan lists the quanta of one stage in dependency order, together with
//! the collections they read and write and any simulated failures. Plans are
//! written to disk as JSON by the plan-building step and read back by every
//! execution step that consumes them.

use crate::error::BuildError;
use crate::failure::FailureDirective;
use crate::predicate::DataPredicate;
use cim_catalog::DatasetType;
use cim_dimensions::DataCoordinate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything the plan builder needs to derive one stage's plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub pipeline: PathBuf,
    /// Task labels or subset names; empty means the whole pipeline
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(rename = "where", default)]
    pub predicate: DataPredicate,
    pub input: String,
    pub output: String,
    pub output_run: String,
    #[serde(default)]
    pub failures: Vec<FailureDirective>,
    /// Skip quanta whose outputs already exist in this collection
    #[serde(default)]
    pub skip_existing_in: Option<String>,
    #[serde(default)]
    pub extend_run: bool,
    #[serde(default)]
    pub clobber_outputs: bool,
    #[serde(default)]
    pub unmocked_dataset_types: Vec<String>,
}

/// Flags passed to an execution step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecOptions {
    pub extend_run: bool,
    pub clobber_outputs: bool,
    /// Per-quantum memory limit in bytes
    pub memory_per_quantum: Option<u64>,
    pub raise_on_partial_outputs: bool,
}

impl ExecOptions {
    #[must_use]
    pub fn with_extend_run(mut self, extend_run: bool) -> Self {
        self.extend_run = extend_run;
        self
    }

    #[must_use]
    pub fn with_clobber_outputs(mut self, clobber_outputs: bool) -> Self {
        self.clobber_outputs = clobber_outputs;
        self
    }

    #[must_use]
    pub fn with_memory_per_quantum(mut self, memory: Option<u64>) -> Self {
        self.memory_per_quantum = memory;
        self
    }

    #[must_use]
    pub fn with_raise_on_partial_outputs(mut self, raise: bool) -> Self {
        self.raise_on_partial_outputs = raise;
        self
    }
}

/// One dataset read or written by a quantum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDataset {
    pub dataset_type: DatasetType,
    pub data_id: DataCoordinate,
}

/// One scheduled execution of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedQuantum {
    pub task: String,
    pub data_id: DataCoordinate,
    #[serde(default)]
    pub inputs: Vec<PlannedDataset>,
    /// Declared outputs; the task metadata dataset is always last
    pub outputs: Vec<PlannedDataset>,
}

impl PlannedQuantum {
    /// Dataset whose presence marks the quantum as having completed
    #[must_use]
    pub fn metadata(&self) -> Option<&PlannedDataset> {
        self.outputs.last()
    }

    /// Outputs other than the metadata dataset
    #[must_use]
    pub fn products(&self) -> &[PlannedDataset] {
        match self.outputs.split_last() {
            Some((_, products)) => products,
            None => &[],
        }
    }
}

/// Name of the metadata dataset type written by every quantum of `task`
#[must_use]
pub fn metadata_type_name(task: &str) -> String {
    format!("{task}_metadata")
}

/// A stage's execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumPlan {
    pub input: String,
    pub output: String,
    pub output_run: String,
    #[serde(default)]
    pub extend_run: bool,
    #[serde(default)]
    pub clobber_outputs: bool,
    #[serde(default)]
    pub failures: Vec<FailureDirective>,
    /// Quanta in an order where producers precede consumers
    pub quanta: Vec<PlannedQuantum>,
}

impl QuantumPlan {
    /// Empty plan carrying the collections and flags of `request`
    #[must_use]
    pub fn for_request(request: &PlanRequest) -> Self {
        Self {
            input: request.input.clone(),
            output: request.output.clone(),
            output_run: request.output_run.clone(),
            extend_run: request.extend_run,
            clobber_outputs: request.clobber_outputs,
            failures: request.failures.clone(),
            quanta: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.quanta.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quanta.is_empty()
    }

    /// Quanta of one task
    pub fn quanta_of<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a PlannedQuantum> + 'a {
        self.quanta.iter().filter(move |q| q.task == task)
    }

    /// Task labels in first-seen order
    #[must_use]
    pub fn tasks(&self) -> Vec<&str> {
        let mut tasks: Vec<&str> = Vec::new();
        for quantum in &self.quanta {
            if !tasks.contains(&quantum.task.as_str()) {
                tasks.push(&quantum.task);
            }
        }
        tasks
    }

    /// Every dataset type the plan writes, in first-seen order
    #[must_use]
    pub fn output_types(&self) -> Vec<&DatasetType> {
        let mut types: Vec<&DatasetType> = Vec::new();
        for output in self.quanta.iter().flat_map(|q| &q.outputs) {
            if !types.iter().any(|t| t.name == output.dataset_type.name) {
                types.push(&output.dataset_type);
            }
        }
        types
    }

    pub fn read(path: &Path) -> Result<Self, BuildError> {
        let bytes = fs::read(path).map_err(|e| BuildError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| BuildError::PlanFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), BuildError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| BuildError::PlanFormat {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, bytes).map_err(|e| BuildError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_dimensions::{DimensionUniverse, KeyValue};

    fn quantum(universe: &DimensionUniverse, task: &str, detector: i64) -> PlannedQuantum {
        let dims = universe.extract(["detector"]).unwrap();
        let data_id = DataCoordinate::from_pairs(
            &dims,
            [("instrument", KeyValue::from("HSC")), ("detector", KeyValue::from(detector))],
        )
        .unwrap();
        let output = |name: String| PlannedDataset {
            dataset_type: DatasetType::new(name, dims.clone(), "_mock_StructuredDataDict"),
            data_id: data_id.clone(),
        };
        PlannedQuantum {
            task: task.to_string(),
            data_id: data_id.clone(),
            inputs: Vec::new(),
            outputs: vec![output(format!("{task}_out")), output(metadata_type_name(task))],
        }
    }

    #[test]
    fn metadata_is_last_output() {
        let universe = DimensionUniverse::standard();
        let q = quantum(&universe, "_mock_isr", 42);
        assert_eq!(q.metadata().unwrap().dataset_type.name, "_mock_isr_metadata");
        assert_eq!(q.products().len(), 1);
    }

    #[test]
    fn plan_file_round_trip() {
        let universe = DimensionUniverse::standard();
        let mut plan = QuantumPlan {
            input: "HSC/defaults".into(),
            output: "HSC/runs/ci".into(),
            output_run: "HSC/runs/ci/full".into(),
            extend_run: false,
            clobber_outputs: false,
            failures: vec![FailureDirective::parse("_mock_isr:error:detector = 42").unwrap()],
            quanta: Vec::new(),
        };
        plan.quanta.push(quantum(&universe, "_mock_isr", 41));
        plan.quanta.push(quantum(&universe, "_mock_isr", 42));
        plan.quanta.push(quantum(&universe, "_mock_calibrate", 42));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci/full.qgraph.json");
        plan.write(&path).unwrap();
        let read = QuantumPlan::read(&path).unwrap();
        assert_eq!(read, plan);
        assert_eq!(read.tasks(), vec!["_mock_isr", "_mock_calibrate"]);
        assert_eq!(read.quanta_of("_mock_isr").count(), 2);
        assert_eq!(read.output_types().len(), 4);
    }
}
