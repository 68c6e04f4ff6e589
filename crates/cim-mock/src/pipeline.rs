//! Pipeline definitions
//!
//! A pipeline is a YAML document listing tasks (keyed by label) with their
//! quantum dimensions and input/output connections, plus named subsets of
//! task labels:
//!
//! ```yaml
//! description: single-frame processing
//! tasks:
//!   isr:
//!     dimensions: [exposure, detector]
//!     inputs:
//!       ccdExposure: {dataset_type: raw, dimensions: [exposure, detector], storage_class: Exposure}
//!     outputs:
//!       outputExposure: {dataset_type: postISRCCD, dimensions: [exposure, detector], storage_class: Exposure}
//! subsets:
//!   step1: [isr]
//! ```

use crate::error::MockError;
use crate::naming::mock_name;
use cim_catalog::DatasetType;
use cim_dimensions::DimensionUniverse;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One dataset type read or written by a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub dataset_type: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub storage_class: String,
}

impl Connection {
    /// Resolve against a universe
    pub fn resolve(&self, universe: &DimensionUniverse) -> Result<DatasetType, MockError> {
        Ok(DatasetType::new(
            self.dataset_type.clone(),
            universe.extract(&self.dimensions)?,
            self.storage_class.clone(),
        ))
    }
}

/// One task of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskDef {
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub inputs: IndexMap<String, Connection>,
    #[serde(default)]
    pub outputs: IndexMap<String, Connection>,
}

/// A parsed pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub description: String,
    pub tasks: IndexMap<String, TaskDef>,
    #[serde(default)]
    pub subsets: IndexMap<String, Vec<String>>,
}

impl PipelineDefinition {
    pub fn from_yaml_str(text: &str) -> Result<Self, MockError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, MockError> {
        let text = std::fs::read_to_string(path).map_err(|source| MockError::PipelineRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Mocked copy: every task label, subset member and dataset type gets
    /// the mock prefix, except dataset types listed in `unmocked`.
    /// Storage classes of mocked dataset types are mocked too.
    #[must_use]
    pub fn mocked(&self, unmocked: &[String]) -> Self {
        let mock_connection = |connection: &Connection| {
            if unmocked.contains(&connection.dataset_type) {
                connection.clone()
            } else {
                Connection {
                    dataset_type: mock_name(&connection.dataset_type),
                    dimensions: connection.dimensions.clone(),
                    storage_class: mock_name(&connection.storage_class),
                }
            }
        };
        let mock_connections = |connections: &IndexMap<String, Connection>| -> IndexMap<String, Connection> {
            connections
                .iter()
                .map(|(name, c)| (name.clone(), mock_connection(c)))
                .collect()
        };

        Self {
            description: self.description.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|(label, task)| {
                    let mocked = TaskDef {
                        dimensions: task.dimensions.clone(),
                        inputs: mock_connections(&task.inputs),
                        outputs: mock_connections(&task.outputs),
                    };
                    (mock_name(label), mocked)
                })
                .collect(),
            subsets: self
                .subsets
                .iter()
                .map(|(name, labels)| (name.clone(), labels.iter().map(|l| mock_name(l)).collect()))
                .collect(),
        }
    }

    /// Input connections never produced by any task, first occurrence of
    /// each dataset type in task order
    #[must_use]
    pub fn overall_inputs(&self) -> Vec<&Connection> {
        let produced: IndexSet<&str> = self
            .tasks
            .values()
            .flat_map(|task| task.outputs.values())
            .map(|c| c.dataset_type.as_str())
            .collect();
        let mut seen = IndexSet::new();
        self.tasks
            .values()
            .flat_map(|task| task.inputs.values())
            .filter(|c| !produced.contains(c.dataset_type.as_str()))
            .filter(|c| seen.insert(c.dataset_type.as_str()))
            .collect()
    }

    /// Task labels selected by a list of labels or subset names, in
    /// pipeline order; an empty selection means every task
    pub fn select(&self, selection: &[String]) -> Result<Vec<&str>, MockError> {
        if selection.is_empty() {
            return Ok(self.tasks.keys().map(String::as_str).collect());
        }
        let mut chosen = IndexSet::new();
        for name in selection {
            if let Some(members) = self.subsets.get(name) {
                for label in members {
                    if !self.tasks.contains_key(label) {
                        return Err(MockError::UnknownLabel(label.clone()));
                    }
                    chosen.insert(label.as_str());
                }
            } else if self.tasks.contains_key(name) {
                chosen.insert(name.as_str());
            } else {
                return Err(MockError::UnknownLabel(name.clone()));
            }
        }
        Ok(self
            .tasks
            .keys()
            .map(String::as_str)
            .filter(|label| chosen.contains(label))
            .collect())
    }

    #[must_use]
    pub fn task(&self, label: &str) -> Option<&TaskDef> {
        self.tasks.get(label)
    }
}
