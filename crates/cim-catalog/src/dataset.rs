//! Dataset types, references and mock payloads

use cim_dimensions::{DataCoordinate, DimensionSet};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Named kind of dataset over a key space
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetType {
    pub name: String,
    pub dimensions: DimensionSet,
    pub storage_class: String,
}

impl DatasetType {
    pub fn new(name: impl Into<String>, dimensions: DimensionSet, storage_class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions,
            storage_class: storage_class.into(),
        }
    }
}

impl Display for DatasetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} [{}]", self.name, self.dimensions, self.storage_class)
    }
}

/// Outcome of registering a dataset type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The type did not exist and was added
    NewlyRegistered,
    /// An equivalent definition was already present
    AlreadyExisted,
}

impl Registration {
    #[inline]
    #[must_use]
    pub fn is_new(self) -> bool {
        matches!(self, Self::NewlyRegistered)
    }
}

/// Handle to one stored dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub id: Uuid,
    pub dataset_type: String,
    pub data_id: DataCoordinate,
    pub run: String,
}

impl Display for DatasetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.dataset_type, self.data_id, self.run)
    }
}

/// Provenance of a dataset written by a simulated unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockQuantum {
    pub task: String,
    pub data_id: DataCoordinate,
    #[serde(default)]
    pub inputs: Vec<Uuid>,
}

/// Placeholder dataset content
///
/// Records what the dataset is and where it came from, so tests can check
/// provenance without any real payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockDataset {
    #[serde(default)]
    pub dataset_id: Option<Uuid>,
    pub dataset_type: String,
    pub storage_class: String,
    pub data_id: DataCoordinate,
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantum: Option<MockQuantum>,
}

impl MockDataset {
    /// Payload for `dataset_type` at `data_id`; the id is assigned on write
    #[must_use]
    pub fn new(dataset_type: &DatasetType, data_id: &DataCoordinate, run: &str) -> Self {
        Self {
            dataset_id: None,
            dataset_type: dataset_type.name.clone(),
            storage_class: dataset_type.storage_class.clone(),
            data_id: data_id.clone(),
            run: run.to_string(),
            quantum: None,
        }
    }

    #[must_use]
    pub fn with_quantum(mut self, quantum: MockQuantum) -> Self {
        self.quantum = Some(quantum);
        self
    }
}
