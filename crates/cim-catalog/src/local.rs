//! File-backed catalog
//!
//! Layout under the repository root:
//!
//! ```text
//! <root>/catalog.json                         records, types, collections, refs
//! <root>/datasets/<run>/<type>/<uuid>.json    one payload per dataset
//! ```
//!
//! The catalog file is rewritten after every mutation, so a repository can
//! be archived at any point between calls.

use crate::catalog::Catalog;
use crate::collection::{self, CollectionKind, CollectionRecord};
use crate::dataset::{DatasetRef, DatasetType, MockDataset, Registration};
use crate::error::CatalogError;
use crate::query::RecordIndex;
use crate::record::DimensionRecord;
use cim_dimensions::{CoordinateSet, DataCoordinate, DimensionError, DimensionSet, DimensionUniverse};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Name of the catalog file at the repository root
pub const CATALOG_FILE: &str = "catalog.json";

const DATASETS_DIR: &str = "datasets";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogState {
    #[serde(default)]
    dataset_types: IndexMap<String, DatasetType>,
    #[serde(default)]
    records: IndexMap<String, Vec<DimensionRecord>>,
    #[serde(default)]
    collections: IndexMap<String, CollectionRecord>,
    #[serde(default)]
    datasets: Vec<DatasetRef>,
}

/// Catalog stored as JSON files in a repository directory
#[derive(Debug)]
pub struct LocalCatalog {
    root: PathBuf,
    universe: DimensionUniverse,
    state: CatalogState,
}

impl LocalCatalog {
    /// Create an empty repository at `root`, which must not already hold one
    pub fn create(root: impl AsRef<Path>, universe: DimensionUniverse) -> Result<Self, CatalogError> {
        let root = root.as_ref().to_path_buf();
        if root.join(CATALOG_FILE).exists() {
            return Err(CatalogError::RepositoryExists(root));
        }
        fs::create_dir_all(&root).map_err(|e| CatalogError::io(&root, e))?;
        let catalog = Self {
            root,
            universe,
            state: CatalogState::default(),
        };
        catalog.save()?;
        debug!(root = %catalog.root.display(), "created catalog");
        Ok(catalog)
    }

    /// Open the repository at `root`
    pub fn open(root: impl AsRef<Path>, universe: DimensionUniverse) -> Result<Self, CatalogError> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(CATALOG_FILE);
        if !path.exists() {
            return Err(CatalogError::RepositoryNotFound(root));
        }
        let bytes = fs::read(&path).map_err(|e| CatalogError::io(&path, e))?;
        let state = serde_json::from_slice(&bytes).map_err(|source| CatalogError::Json { path, source })?;
        Ok(Self {
            root,
            universe,
            state,
        })
    }

    /// Whether `root` holds a repository
    #[must_use]
    pub fn exists(root: impl AsRef<Path>) -> bool {
        root.as_ref().join(CATALOG_FILE).exists()
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every stored dataset, in insertion order
    #[inline]
    #[must_use]
    pub fn datasets(&self) -> &[DatasetRef] {
        &self.state.datasets
    }

    fn save(&self) -> Result<(), CatalogError> {
        let path = self.root.join(CATALOG_FILE);
        let bytes = serde_json::to_vec_pretty(&self.state).map_err(|source| CatalogError::Json {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| CatalogError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| CatalogError::io(&path, e))
    }

    fn payload_path(&self, dataset: &DatasetRef) -> PathBuf {
        let mut path = self.root.join(DATASETS_DIR);
        for part in dataset.run.split('/') {
            path.push(part);
        }
        path.join(&dataset.dataset_type).join(format!("{}.json", dataset.id))
    }

    fn index(&self) -> RecordIndex<'_> {
        RecordIndex::new(&self.universe, &self.state.records)
    }

    fn require_kind(&self, name: &str, kind: CollectionKind) -> Result<&CollectionRecord, CatalogError> {
        let record = self
            .state
            .collections
            .get(name)
            .ok_or_else(|| CatalogError::UnknownCollection(name.to_string()))?;
        if record.kind != kind {
            return Err(CatalogError::CollectionKind {
                name: name.to_string(),
                expected: kind.to_string(),
                actual: record.kind.to_string(),
            });
        }
        Ok(record)
    }

    fn search_path(&self, collections: &[String]) -> Result<Vec<String>, CatalogError> {
        let mut runs: Vec<String> = Vec::new();
        for name in collections {
            for run in collection::flatten(&self.state.collections, name)? {
                if !runs.contains(&run) {
                    runs.push(run);
                }
            }
        }
        Ok(runs)
    }
}

impl Catalog for LocalCatalog {
    fn universe(&self) -> &DimensionUniverse {
        &self.universe
    }

    fn query_coordinates(&self, dimensions: &DimensionSet) -> Result<CoordinateSet, CatalogError> {
        let result = self.index().query(dimensions)?;
        debug!(dimensions = %dimensions, count = result.len(), "queried coordinates");
        Ok(result)
    }

    fn expand_coordinate(
        &self,
        coordinate: &DataCoordinate,
        dimensions: &DimensionSet,
    ) -> Result<DataCoordinate, CatalogError> {
        self.index().expand(coordinate, dimensions)
    }

    fn register_dataset_type(&mut self, dataset_type: &DatasetType) -> Result<Registration, CatalogError> {
        if !self.universe.is_closed(&dataset_type.dimensions) {
            self.universe.extract(dataset_type.dimensions.names())?;
            return Err(CatalogError::NotClosed(dataset_type.dimensions.clone()));
        }
        if let Some(existing) = self.state.dataset_types.get(&dataset_type.name) {
            if existing == dataset_type {
                return Ok(Registration::AlreadyExisted);
            }
            return Err(CatalogError::DatasetTypeConflict {
                name: dataset_type.name.clone(),
                existing: existing.to_string(),
            });
        }
        self.state
            .dataset_types
            .insert(dataset_type.name.clone(), dataset_type.clone());
        self.save()?;
        Ok(Registration::NewlyRegistered)
    }

    fn dataset_type(&self, name: &str) -> Option<DatasetType> {
        self.state.dataset_types.get(name).cloned()
    }

    fn dataset_types(&self) -> Vec<DatasetType> {
        self.state.dataset_types.values().cloned().collect()
    }

    fn insert_records(&mut self, element: &str, records: Vec<DimensionRecord>) -> Result<(), CatalogError> {
        {
            let index = self.index();
            for record in &records {
                index.validate_record(element, record)?;
            }
        }
        let stored = self.state.records.entry(element.to_string()).or_default();
        let count = records.len();
        for record in records {
            match stored.iter_mut().find(|r| r.keys == record.keys) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        self.save()?;
        debug!(element, count, "inserted dimension records");
        Ok(())
    }

    fn records(&self, element: &str) -> Vec<DimensionRecord> {
        self.state.records.get(element).cloned().unwrap_or_default()
    }

    fn put_dataset(
        &mut self,
        mut payload: MockDataset,
        dataset_type: &DatasetType,
        data_id: &DataCoordinate,
        run: &str,
    ) -> Result<DatasetRef, CatalogError> {
        if self.state.dataset_types.get(&dataset_type.name) != Some(dataset_type) {
            return Err(CatalogError::UnknownDatasetType(dataset_type.name.clone()));
        }
        self.require_kind(run, CollectionKind::Run)?;
        let actual = data_id.dimensions();
        if actual != dataset_type.dimensions {
            return Err(DimensionError::KeyMismatch {
                expected: dataset_type.dimensions.clone(),
                actual,
            }
            .into());
        }
        let duplicate = self
            .state
            .datasets
            .iter()
            .any(|d| d.run == run && d.dataset_type == dataset_type.name && &d.data_id == data_id);
        if duplicate {
            return Err(CatalogError::DatasetConflict {
                dataset_type: dataset_type.name.clone(),
                data_id: data_id.to_string(),
                run: run.to_string(),
            });
        }

        let dataset = DatasetRef {
            id: Uuid::new_v4(),
            dataset_type: dataset_type.name.clone(),
            data_id: data_id.clone().with_region(None),
            run: run.to_string(),
        };
        payload.dataset_id = Some(dataset.id);
        payload.run = run.to_string();

        let path = self.payload_path(&dataset);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CatalogError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(&payload).map_err(|source| CatalogError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|e| CatalogError::io(&path, e))?;

        self.state.datasets.push(dataset.clone());
        self.save()?;
        Ok(dataset)
    }

    fn find_dataset(
        &self,
        dataset_type: &str,
        data_id: &DataCoordinate,
        collections: &[String],
    ) -> Result<Option<DatasetRef>, CatalogError> {
        for run in self.search_path(collections)? {
            let found = self
                .state
                .datasets
                .iter()
                .find(|d| d.run == run && d.dataset_type == dataset_type && &d.data_id == data_id);
            if let Some(found) = found {
                return Ok(Some(found.clone()));
            }
        }
        Ok(None)
    }

    fn query_datasets(&self, dataset_type: &str, collections: &[String]) -> Result<Vec<DatasetRef>, CatalogError> {
        let mut result = Vec::new();
        for run in self.search_path(collections)? {
            result.extend(
                self.state
                    .datasets
                    .iter()
                    .filter(|d| d.run == run && d.dataset_type == dataset_type)
                    .cloned(),
            );
        }
        Ok(result)
    }

    fn remove_dataset(&mut self, dataset: &DatasetRef) -> Result<(), CatalogError> {
        let position = self
            .state
            .datasets
            .iter()
            .position(|d| d.id == dataset.id)
            .ok_or(CatalogError::DatasetNotFound(dataset.id))?;
        let removed = self.state.datasets.remove(position);
        let path = self.payload_path(&removed);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(CatalogError::io(&path, e)),
            _ => {}
        }
        self.save()
    }

    fn get_dataset(&self, dataset: &DatasetRef) -> Result<MockDataset, CatalogError> {
        let stored = self
            .state
            .datasets
            .iter()
            .find(|d| d.id == dataset.id)
            .ok_or(CatalogError::DatasetNotFound(dataset.id))?;
        let path = self.payload_path(stored);
        let bytes = fs::read(&path).map_err(|e| CatalogError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| CatalogError::Json { path, source })
    }

    fn register_collection(&mut self, name: &str, kind: CollectionKind) -> Result<bool, CatalogError> {
        if self.state.collections.contains_key(name) {
            self.require_kind(name, kind)?;
            return Ok(false);
        }
        self.state.collections.insert(
            name.to_string(),
            CollectionRecord {
                kind,
                children: Vec::new(),
            },
        );
        self.save()?;
        debug!(name, %kind, "registered collection");
        Ok(true)
    }

    fn set_collection_chain(&mut self, name: &str, members: &[String]) -> Result<(), CatalogError> {
        self.require_kind(name, CollectionKind::Chained)?;
        if let Some(missing) = members.iter().find(|m| !self.state.collections.contains_key(*m)) {
            return Err(CatalogError::UnknownCollection(missing.clone()));
        }

        let previous = self
            .state
            .collections
            .get_mut(name)
            .map(|record| std::mem::replace(&mut record.children, members.to_vec()));
        if let Err(err) = collection::flatten(&self.state.collections, name) {
            if let (Some(record), Some(previous)) = (self.state.collections.get_mut(name), previous) {
                record.children = previous;
            }
            return Err(err);
        }
        self.save()
    }

    fn collections(&self) -> Vec<(String, CollectionKind)> {
        self.state
            .collections
            .iter()
            .map(|(name, record)| (name.clone(), record.kind))
            .collect()
    }

    fn flatten_collection(&self, name: &str) -> Result<Vec<String>, CatalogError> {
        collection::flatten(&self.state.collections, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_dimensions::KeyValue;

    fn catalog(dir: &Path) -> LocalCatalog {
        let mut catalog = LocalCatalog::create(dir.join("repo"), DimensionUniverse::standard()).unwrap();
        catalog
            .insert_records("instrument", vec![DimensionRecord::new([("instrument", KeyValue::from("HSC"))])])
            .unwrap();
        catalog
            .insert_records(
                "detector",
                vec![DimensionRecord::new([
                    ("instrument", KeyValue::from("HSC")),
                    ("detector", KeyValue::from(42)),
                ])],
            )
            .unwrap();
        catalog
    }

    fn detector_type(universe: &DimensionUniverse) -> DatasetType {
        DatasetType::new("_mock_bias", universe.extract(["detector"]).unwrap(), "_mock_ExposureF")
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _ = catalog(dir.path());
        assert!(matches!(
            LocalCatalog::create(dir.path().join("repo"), DimensionUniverse::standard()),
            Err(CatalogError::RepositoryExists(_))
        ));
    }

    #[test]
    fn registration_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        let bias = detector_type(catalog.universe());

        assert_eq!(catalog.register_dataset_type(&bias).unwrap(), Registration::NewlyRegistered);
        assert_eq!(catalog.register_dataset_type(&bias).unwrap(), Registration::AlreadyExisted);

        let conflicting = DatasetType::new("_mock_bias", bias.dimensions.clone(), "_mock_Other");
        let err = catalog.register_dataset_type(&conflicting).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn unclosed_dataset_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        let bad = DatasetType::new("_mock_bad", DimensionSet::from_names(["detector"]), "x");
        assert!(matches!(catalog.register_dataset_type(&bad), Err(CatalogError::NotClosed(_))));
    }

    #[test]
    fn put_find_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        let bias = detector_type(catalog.universe());
        catalog.register_dataset_type(&bias).unwrap();
        catalog.register_collection("calib", CollectionKind::Run).unwrap();

        let data_id = catalog
            .query_coordinates(&bias.dimensions)
            .unwrap()
            .iter()
            .next()
            .cloned()
            .unwrap();
        let payload = MockDataset::new(&bias, &data_id, "calib");
        let stored = catalog.put_dataset(payload.clone(), &bias, &data_id, "calib").unwrap();

        let again = catalog.put_dataset(payload, &bias, &data_id, "calib");
        assert!(matches!(again, Err(CatalogError::DatasetConflict { .. })));

        let search = vec!["calib".to_string()];
        let found = catalog.find_dataset("_mock_bias", &data_id, &search).unwrap();
        assert_eq!(found.as_ref(), Some(&stored));
        assert_eq!(catalog.get_dataset(&stored).unwrap().dataset_id, Some(stored.id));

        catalog.remove_dataset(&stored).unwrap();
        assert!(catalog.find_dataset("_mock_bias", &data_id, &search).unwrap().is_none());
        assert!(catalog.get_dataset(&stored).is_err());
    }

    #[test]
    fn put_requires_run_collection() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        let bias = detector_type(catalog.universe());
        catalog.register_dataset_type(&bias).unwrap();
        catalog.register_collection("chain", CollectionKind::Chained).unwrap();

        let data_id = catalog.query_coordinates(&bias.dimensions).unwrap().iter().next().cloned().unwrap();
        let payload = MockDataset::new(&bias, &data_id, "chain");
        assert!(matches!(
            catalog.put_dataset(payload.clone(), &bias, &data_id, "chain"),
            Err(CatalogError::CollectionKind { .. })
        ));
        assert!(matches!(
            catalog.put_dataset(payload, &bias, &data_id, "missing"),
            Err(CatalogError::UnknownCollection(_))
        ));
    }

    #[test]
    fn chain_cycle_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        catalog.register_collection("run", CollectionKind::Run).unwrap();
        catalog.register_collection("a", CollectionKind::Chained).unwrap();
        catalog.register_collection("b", CollectionKind::Chained).unwrap();
        catalog.set_collection_chain("a", &["b".to_string()]).unwrap();
        catalog.set_collection_chain("b", &["run".to_string()]).unwrap();

        let err = catalog.set_collection_chain("b", &["a".to_string()]).unwrap_err();
        assert!(matches!(err, CatalogError::ChainCycle(_)));
        assert_eq!(catalog.flatten_collection("a").unwrap(), vec!["run"]);
    }

    #[test]
    fn reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let root = {
            let mut catalog = catalog(dir.path());
            catalog.register_collection("HSC/misc", CollectionKind::Run).unwrap();
            catalog.root().to_path_buf()
        };
        let reopened = LocalCatalog::open(&root, DimensionUniverse::standard()).unwrap();
        assert_eq!(reopened.records("detector").len(), 1);
        assert_eq!(reopened.collections(), vec![("HSC/misc".to_string(), CollectionKind::Run)]);
    }
}
