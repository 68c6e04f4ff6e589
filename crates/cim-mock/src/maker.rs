//! Mock-dataset materialization

use crate::engine::ExpansionEngine;
use crate::error::MockError;
use crate::naming::is_mock_name;
use crate::pipeline::PipelineDefinition;
use cim_catalog::{Catalog, CollectionKind, DatasetType, LocalCatalog, MockDataset, Registration};
use cim_dimensions::DimensionUniverse;
use std::path::Path;
use tracing::{debug, info};

/// Default run for pipeline-specific mock inputs
pub const MISC_INPUT_RUN: &str = "HSC/misc";

/// Dataset types written for real rather than mocked
pub const UNMOCKED_DATASET_TYPES: [&str; 1] = ["skyMap"];

/// What [`MockDatasetMaker::make_datasets`] did for one dataset type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// Name does not follow the mock convention
    NotMocked,
    /// Type was already registered; its datasets are assumed present
    AlreadyPopulated,
    /// Type was registered and this many datasets were written
    Written(usize),
}

impl Materialized {
    /// Datasets written
    #[inline]
    #[must_use]
    pub fn count(self) -> usize {
        match self {
            Self::Written(count) => count,
            Self::NotMocked | Self::AlreadyPopulated => 0,
        }
    }
}

/// Registers mock dataset types and writes one placeholder dataset per
/// coordinate of each
pub struct MockDatasetMaker<'c, C: Catalog + ?Sized> {
    catalog: &'c mut C,
    engine: ExpansionEngine,
}

impl<'c, C: Catalog + ?Sized> MockDatasetMaker<'c, C> {
    /// Maker with a fresh session cache
    pub fn new(catalog: &'c mut C) -> Result<Self, MockError> {
        let engine = ExpansionEngine::new(catalog.universe())?;
        Ok(Self { catalog, engine })
    }

    #[inline]
    #[must_use]
    pub fn engine(&self) -> &ExpansionEngine {
        &self.engine
    }

    /// Register `dataset_type` and write its datasets into `run`.
    ///
    /// A type that was already registered is left alone. Writes are not
    /// rolled back if one fails partway.
    pub fn make_datasets(&mut self, dataset_type: &DatasetType, run: &str) -> Result<Materialized, MockError> {
        if !is_mock_name(&dataset_type.name) {
            return Ok(Materialized::NotMocked);
        }
        if self.catalog.register_dataset_type(dataset_type)? == Registration::AlreadyExisted {
            debug!(dataset_type = %dataset_type.name, "dataset type already registered, skipping");
            return Ok(Materialized::AlreadyPopulated);
        }

        let coordinates = self
            .engine
            .expand_dimensions(&*self.catalog, &dataset_type.dimensions)?;
        self.catalog.register_collection(run, CollectionKind::Run)?;
        for data_id in coordinates.iter() {
            let payload = MockDataset::new(dataset_type, data_id, run);
            self.catalog.put_dataset(payload, dataset_type, data_id, run)?;
        }
        info!(
            dataset_type = %dataset_type.name,
            run,
            count = coordinates.len(),
            "wrote mock datasets"
        );
        Ok(Materialized::Written(coordinates.len()))
    }

    /// Mock every overall input of an already-mocked pipeline
    pub fn make_inputs(&mut self, pipeline: &PipelineDefinition, run: &str) -> Result<usize, MockError> {
        let mut written = 0;
        for connection in pipeline.overall_inputs() {
            let dataset_type = connection.resolve(self.catalog.universe())?;
            written += self.make_datasets(&dataset_type, run)?.count();
        }
        Ok(written)
    }
}

/// Mock the overall inputs of the pipeline at `pipeline_path` into the
/// repository at `root`, returning the number of datasets written
pub fn prep(root: &Path, pipeline_path: &Path, run: &str) -> Result<usize, MockError> {
    let unmocked: Vec<String> = UNMOCKED_DATASET_TYPES.iter().map(ToString::to_string).collect();
    let pipeline = PipelineDefinition::from_path(pipeline_path)?.mocked(&unmocked);
    let mut catalog = LocalCatalog::open(root, DimensionUniverse::standard())?;
    let mut maker = MockDatasetMaker::new(&mut catalog)?;
    let written = maker.make_inputs(&pipeline, run)?;
    info!(
        root = %root.display(),
        pipeline = %pipeline_path.display(),
        run,
        written,
        "prepared repository for pipeline"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_catalog::{CatalogError, DatasetRef, DimensionRecord};
    use cim_dimensions::{CoordinateSet, DataCoordinate, DimensionSet, KeyValue};
    use mockall::mock;

    mock! {
        pub Store {}

        impl Catalog for Store {
            fn universe(&self) -> &DimensionUniverse;
            fn query_coordinates(&self, dimensions: &DimensionSet) -> Result<CoordinateSet, CatalogError>;
            fn expand_coordinate(&self, coordinate: &DataCoordinate, dimensions: &DimensionSet) -> Result<DataCoordinate, CatalogError>;
            fn register_dataset_type(&mut self, dataset_type: &DatasetType) -> Result<Registration, CatalogError>;
            fn dataset_type(&self, name: &str) -> Option<DatasetType>;
            fn dataset_types(&self) -> Vec<DatasetType>;
            fn insert_records(&mut self, element: &str, records: Vec<DimensionRecord>) -> Result<(), CatalogError>;
            fn records(&self, element: &str) -> Vec<DimensionRecord>;
            fn put_dataset(&mut self, payload: MockDataset, dataset_type: &DatasetType, data_id: &DataCoordinate, run: &str) -> Result<DatasetRef, CatalogError>;
            fn find_dataset(&self, dataset_type: &str, data_id: &DataCoordinate, collections: &[String]) -> Result<Option<DatasetRef>, CatalogError>;
            fn query_datasets(&self, dataset_type: &str, collections: &[String]) -> Result<Vec<DatasetRef>, CatalogError>;
            fn remove_dataset(&mut self, dataset: &DatasetRef) -> Result<(), CatalogError>;
            fn get_dataset(&self, dataset: &DatasetRef) -> Result<MockDataset, CatalogError>;
            fn register_collection(&mut self, name: &str, kind: CollectionKind) -> Result<bool, CatalogError>;
            fn set_collection_chain(&mut self, name: &str, members: &[String]) -> Result<(), CatalogError>;
            fn collections(&self) -> Vec<(String, CollectionKind)>;
            fn flatten_collection(&self, name: &str) -> Result<Vec<String>, CatalogError>;
        }
    }

    fn detector_type(universe: &DimensionUniverse) -> DatasetType {
        DatasetType::new("_mock_bias", universe.extract(["detector"]).unwrap(), "_mock_ExposureF")
    }

    fn detectors(universe: &DimensionUniverse) -> CoordinateSet {
        let dims = universe.extract(["detector"]).unwrap();
        let coordinates = [41, 42].into_iter().map(|d| {
            DataCoordinate::from_pairs(
                &dims,
                [("instrument", KeyValue::from("HSC")), ("detector", KeyValue::from(d))],
            )
            .unwrap()
        });
        CoordinateSet::from_coordinates(dims.clone(), coordinates).unwrap()
    }

    #[test]
    fn already_registered_type_writes_nothing() {
        let universe = DimensionUniverse::standard();
        let bias = detector_type(&universe);
        let mut store = MockStore::new();
        store.expect_universe().return_const(universe.clone());
        store
            .expect_register_dataset_type()
            .times(1)
            .returning(|_| Ok(Registration::AlreadyExisted));
        store.expect_query_coordinates().times(0);
        store.expect_put_dataset().times(0);

        let mut maker = MockDatasetMaker::new(&mut store).unwrap();
        assert_eq!(maker.make_datasets(&bias, "HSC/calib").unwrap(), Materialized::AlreadyPopulated);
    }

    #[test]
    fn second_call_issues_no_writes() {
        let universe = DimensionUniverse::standard();
        let bias = detector_type(&universe);
        let coordinates = detectors(&universe);

        let mut store = MockStore::new();
        store.expect_universe().return_const(universe.clone());
        let mut registered = false;
        store.expect_register_dataset_type().times(2).returning(move |_| {
            let result = if registered {
                Registration::AlreadyExisted
            } else {
                Registration::NewlyRegistered
            };
            registered = true;
            Ok(result)
        });
        store
            .expect_query_coordinates()
            .times(1)
            .returning(move |_| Ok(coordinates.clone()));
        store.expect_register_collection().times(1).returning(|_, _| Ok(true));
        store
            .expect_put_dataset()
            .times(2)
            .returning(|payload, _, data_id, run| {
                Ok(DatasetRef {
                    id: uuid_for(data_id),
                    dataset_type: payload.dataset_type,
                    data_id: data_id.clone(),
                    run: run.to_string(),
                })
            });

        let mut maker = MockDatasetMaker::new(&mut store).unwrap();
        assert_eq!(maker.make_datasets(&bias, "HSC/calib").unwrap(), Materialized::Written(2));
        assert_eq!(maker.make_datasets(&bias, "HSC/calib").unwrap(), Materialized::AlreadyPopulated);
    }

    #[test]
    fn unmocked_names_skipped() {
        let universe = DimensionUniverse::standard();
        let sky_map = DatasetType::new("skyMap", universe.extract(["skymap"]).unwrap(), "SkyMap");
        let mut store = MockStore::new();
        store.expect_universe().return_const(universe);
        store.expect_register_dataset_type().times(0);

        let mut maker = MockDatasetMaker::new(&mut store).unwrap();
        assert_eq!(maker.make_datasets(&sky_map, "skymaps").unwrap(), Materialized::NotMocked);
    }

    #[test]
    fn unbounded_dimension_aborts_type() {
        let universe = DimensionUniverse::standard();
        let nightly = DatasetType::new("_mock_nightly", universe.extract(["day_obs"]).unwrap(), "_mock_X");
        let mut store = MockStore::new();
        store.expect_universe().return_const(universe);
        store.expect_register_dataset_type().returning(|_| Ok(Registration::NewlyRegistered));
        store.expect_put_dataset().times(0);

        let mut maker = MockDatasetMaker::new(&mut store).unwrap();
        let err = maker.make_datasets(&nightly, "HSC/misc").unwrap_err();
        assert!(err.is_configuration());
    }

    fn uuid_for(data_id: &DataCoordinate) -> uuid::Uuid {
        let detector = data_id.get("detector").and_then(KeyValue::as_int).unwrap_or(0);
        uuid::Uuid::from_u128(u128::try_from(detector).unwrap_or(0))
    }
}
