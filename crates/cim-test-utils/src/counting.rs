//! Call-counting catalog wrapper

use cim_catalog::{
    Catalog, CatalogError, CollectionKind, DatasetRef, DatasetType, DimensionRecord, MockDataset, Registration,
};
use cim_dimensions::{CoordinateSet, DataCoordinate, DimensionSet, DimensionUniverse};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Forwards every call to an inner catalog and counts calls per method
pub struct CountingCatalog<C> {
    inner: C,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl<C: Catalog> CountingCatalog<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Calls made to `method` since creation or the last reset
    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn record(&self, method: &'static str) {
        *self.calls.lock().entry(method).or_default() += 1;
    }
}

impl<C: Catalog> Catalog for CountingCatalog<C> {
    fn universe(&self) -> &DimensionUniverse {
        self.inner.universe()
    }

    fn query_coordinates(&self, dimensions: &DimensionSet) -> Result<CoordinateSet, CatalogError> {
        self.record("query_coordinates");
        self.inner.query_coordinates(dimensions)
    }

    fn expand_coordinate(
        &self,
        coordinate: &DataCoordinate,
        dimensions: &DimensionSet,
    ) -> Result<DataCoordinate, CatalogError> {
        self.record("expand_coordinate");
        self.inner.expand_coordinate(coordinate, dimensions)
    }

    fn register_dataset_type(&mut self, dataset_type: &DatasetType) -> Result<Registration, CatalogError> {
        self.record("register_dataset_type");
        self.inner.register_dataset_type(dataset_type)
    }

    fn dataset_type(&self, name: &str) -> Option<DatasetType> {
        self.record("dataset_type");
        self.inner.dataset_type(name)
    }

    fn dataset_types(&self) -> Vec<DatasetType> {
        self.record("dataset_types");
        self.inner.dataset_types()
    }

    fn insert_records(&mut self, element: &str, records: Vec<DimensionRecord>) -> Result<(), CatalogError> {
        self.record("insert_records");
        self.inner.insert_records(element, records)
    }

    fn records(&self, element: &str) -> Vec<DimensionRecord> {
        self.record("records");
        self.inner.records(element)
    }

    fn put_dataset(
        &mut self,
        payload: MockDataset,
        dataset_type: &DatasetType,
        data_id: &DataCoordinate,
        run: &str,
    ) -> Result<DatasetRef, CatalogError> {
        self.record("put_dataset");
        self.inner.put_dataset(payload, dataset_type, data_id, run)
    }

    fn find_dataset(
        &self,
        dataset_type: &str,
        data_id: &DataCoordinate,
        collections: &[String],
    ) -> Result<Option<DatasetRef>, CatalogError> {
        self.record("find_dataset");
        self.inner.find_dataset(dataset_type, data_id, collections)
    }

    fn query_datasets(&self, dataset_type: &str, collections: &[String]) -> Result<Vec<DatasetRef>, CatalogError> {
        self.record("query_datasets");
        self.inner.query_datasets(dataset_type, collections)
    }

    fn remove_dataset(&mut self, dataset: &DatasetRef) -> Result<(), CatalogError> {
        self.record("remove_dataset");
        self.inner.remove_dataset(dataset)
    }

    fn get_dataset(&self, dataset: &DatasetRef) -> Result<MockDataset, CatalogError> {
        self.record("get_dataset");
        self.inner.get_dataset(dataset)
    }

    fn register_collection(&mut self, name: &str, kind: CollectionKind) -> Result<bool, CatalogError> {
        self.record("register_collection");
        self.inner.register_collection(name, kind)
    }

    fn set_collection_chain(&mut self, name: &str, members: &[String]) -> Result<(), CatalogError> {
        self.record("set_collection_chain");
        self.inner.set_collection_chain(name, members)
    }

    fn collections(&self) -> Vec<(String, CollectionKind)> {
        self.record("collections");
        self.inner.collections()
    }

    fn flatten_collection(&self, name: &str) -> Result<Vec<String>, CatalogError> {
        self.record("flatten_collection");
        self.inner.flatten_collection(name)
    }
}
