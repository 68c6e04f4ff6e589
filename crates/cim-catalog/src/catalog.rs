//! The catalog contract

use crate::collection::CollectionKind;
use crate::dataset::{DatasetRef, DatasetType, MockDataset, Registration};
use crate::error::CatalogError;
use crate::record::DimensionRecord;
use cim_dimensions::{CoordinateSet, DataCoordinate, DimensionSet, DimensionUniverse};

/// Storage for dimension records, dataset types, datasets and collections
///
/// Reads take `&self`, writes take `&mut self`. Implementations never retry
/// internally; errors propagate to the caller.
pub trait Catalog {
    /// The dimension graph this catalog is built on
    fn universe(&self) -> &DimensionUniverse;

    /// Every coordinate over `dimensions` consistent with the stored
    /// records, fully expanded (implied values and regions attached)
    fn query_coordinates(&self, dimensions: &DimensionSet) -> Result<CoordinateSet, CatalogError>;

    /// Validate `coordinate` against stored records and expand it to
    /// `dimensions`, filling implied values and attaching its region
    fn expand_coordinate(
        &self,
        coordinate: &DataCoordinate,
        dimensions: &DimensionSet,
    ) -> Result<DataCoordinate, CatalogError>;

    /// Register a dataset type; re-registering an equal definition is a no-op
    fn register_dataset_type(&mut self, dataset_type: &DatasetType) -> Result<Registration, CatalogError>;

    fn dataset_type(&self, name: &str) -> Option<DatasetType>;

    fn dataset_types(&self) -> Vec<DatasetType>;

    fn insert_records(&mut self, element: &str, records: Vec<DimensionRecord>) -> Result<(), CatalogError>;

    fn records(&self, element: &str) -> Vec<DimensionRecord>;

    /// Store one dataset in `run`
    fn put_dataset(
        &mut self,
        payload: MockDataset,
        dataset_type: &DatasetType,
        data_id: &DataCoordinate,
        run: &str,
    ) -> Result<DatasetRef, CatalogError>;

    /// First dataset of a type at a coordinate, searching `collections` in order
    fn find_dataset(
        &self,
        dataset_type: &str,
        data_id: &DataCoordinate,
        collections: &[String],
    ) -> Result<Option<DatasetRef>, CatalogError>;

    /// All datasets of a type in the runs `collections` flatten to
    fn query_datasets(&self, dataset_type: &str, collections: &[String]) -> Result<Vec<DatasetRef>, CatalogError>;

    fn remove_dataset(&mut self, dataset: &DatasetRef) -> Result<(), CatalogError>;

    fn get_dataset(&self, dataset: &DatasetRef) -> Result<MockDataset, CatalogError>;

    /// Register a collection; `Ok(false)` if it already exists with this kind
    fn register_collection(&mut self, name: &str, kind: CollectionKind) -> Result<bool, CatalogError>;

    /// Replace the members of a chained collection
    fn set_collection_chain(&mut self, name: &str, members: &[String]) -> Result<(), CatalogError>;

    fn collections(&self) -> Vec<(String, CollectionKind)>;

    /// Run collections searched by `name`, in search order
    fn flatten_collection(&self, name: &str) -> Result<Vec<String>, CatalogError>;
}
