//! Archiving a repository and extracting it again reproduces the catalog

use cim_catalog::{
    archive_repo, extract_repo, Catalog, CollectionKind, DatasetType, DimensionRecord, LocalCatalog,
    MockDataset,
};
use cim_dimensions::{DimensionUniverse, KeyValue, Region};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn populate(catalog: &mut LocalCatalog) {
    let hsc = || ("instrument", KeyValue::from("HSC"));
    catalog
        .insert_records("instrument", vec![DimensionRecord::new([hsc()])])
        .unwrap();
    catalog
        .insert_records(
            "detector",
            (0..4)
                .map(|d| DimensionRecord::new([hsc(), ("detector", KeyValue::from(d))]))
                .collect(),
        )
        .unwrap();
    catalog
        .insert_records("skymap", vec![DimensionRecord::new([("skymap", KeyValue::from("ci_mw"))])])
        .unwrap();
    catalog
        .insert_records(
            "tract",
            vec![DimensionRecord::new([("skymap", KeyValue::from("ci_mw")), ("tract", KeyValue::from(0))])
                .with_region(Region::new(148.5, 150.1, 0.7, 2.3))],
        )
        .unwrap();

    catalog.register_collection("HSC/calib/run", CollectionKind::Run).unwrap();
    catalog.register_collection("HSC/calib", CollectionKind::Chained).unwrap();
    catalog
        .set_collection_chain("HSC/calib", &["HSC/calib/run".to_string()])
        .unwrap();

    let universe = catalog.universe().clone();
    for (name, dims) in [("_mock_bias", vec!["detector"]), ("_mock_deepCoadd", vec!["tract"])] {
        let dataset_type = DatasetType::new(name, universe.extract(dims).unwrap(), "_mock_StructuredDataDict");
        catalog.register_dataset_type(&dataset_type).unwrap();
        let coordinates = catalog.query_coordinates(&dataset_type.dimensions).unwrap();
        for data_id in &coordinates {
            let payload = MockDataset::new(&dataset_type, data_id, "HSC/calib/run");
            catalog
                .put_dataset(payload, &dataset_type, data_id, "HSC/calib/run")
                .unwrap();
        }
    }
}

fn summary(catalog: &LocalCatalog) -> (Vec<String>, Vec<String>, BTreeMap<String, usize>) {
    let mut types: Vec<String> = catalog.dataset_types().into_iter().map(|t| t.name).collect();
    types.sort();
    let collections = catalog.collections().into_iter().map(|(name, _)| name).collect();
    let search = vec!["HSC/calib".to_string()];
    let counts = types
        .iter()
        .map(|t| (t.clone(), catalog.query_datasets(t, &search).unwrap().len()))
        .collect();
    (types, collections, counts)
}

#[test]
fn round_trip_preserves_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    let mut catalog = LocalCatalog::create(&repo, DimensionUniverse::standard()).unwrap();
    populate(&mut catalog);
    let before = summary(&catalog);
    assert_eq!(before.2.get("_mock_bias"), Some(&4));
    assert_eq!(before.2.get("_mock_deepCoadd"), Some(&1));
    drop(catalog);

    let archive = tmp.path().join("base.tgz");
    archive_repo(&repo, &archive).unwrap();
    extract_repo(&archive, &repo).unwrap();

    let reopened = LocalCatalog::open(&repo, DimensionUniverse::standard()).unwrap();
    assert_eq!(summary(&reopened), before);

    let first = reopened.datasets()[0].clone();
    let payload = reopened.get_dataset(&first).unwrap();
    assert_eq!(payload.dataset_id, Some(first.id));
}
