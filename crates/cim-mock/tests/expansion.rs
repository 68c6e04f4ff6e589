use cim_catalog::{Catalog, DatasetType, LocalCatalog};
use cim_dimensions::{DataCoordinate, DimensionUniverse, KeyValue, Pixelization};
use cim_mock::{
    mock_name, prep, BoundedResolver, CoordinateCache, ExpansionEngine, KeySpaceSplitter, MockDatasetMaker,
    MISC_INPUT_RUN,
};
use cim_test_utils::{base_repo, open, write_pipeline, CountingCatalog, DETECTORS, EXPOSURES};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const SKYPIX: [&str; 2] = ["grid5", "grid7"];

const BOUNDABLE: [&str; 8] = [
    "instrument",
    "physical_filter",
    "band",
    "detector",
    "exposure",
    "visit",
    "skymap",
    "tract",
];

/// One base repository shared read-only by every test in this file
fn shared_repo() -> &'static Path {
    static REPO: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
    &REPO
        .get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let root = base_repo(dir.path());
            (dir, root)
        })
        .1
}

fn coordinates(engine: &mut ExpansionEngine, catalog: &LocalCatalog, names: &[&str]) -> BTreeSet<DataCoordinate> {
    let dims = catalog.universe().extract(names).unwrap();
    engine.expand_dimensions(catalog, &dims).unwrap().iter().cloned().collect()
}

#[test]
fn test_boundable_expansion_matches_catalog_query() {
    let catalog = open(shared_repo());
    let mut engine = ExpansionEngine::new(catalog.universe()).unwrap();
    for names in [&["exposure", "detector"][..], &["visit"], &["tract", "band"]] {
        let dims = catalog.universe().extract(names).unwrap();
        let queried: BTreeSet<DataCoordinate> = catalog.query_coordinates(&dims).unwrap().iter().cloned().collect();
        assert_eq!(coordinates(&mut engine, &catalog, names), queried, "{names:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_projection_stays_within_expansion(
        narrow in proptest::sample::subsequence(BOUNDABLE.to_vec(), 1..=2),
        extra in proptest::sample::subsequence(BOUNDABLE.to_vec(), 1..=2),
    ) {
        let catalog = open(shared_repo());
        let mut engine = ExpansionEngine::new(catalog.universe()).unwrap();
        let wide: Vec<&str> = narrow.iter().chain(&extra).copied().collect();

        let narrow_dims = catalog.universe().extract(&narrow).unwrap();
        let narrow_set = coordinates(&mut engine, &catalog, &narrow);
        for coordinate in coordinates(&mut engine, &catalog, &wide) {
            let projected = coordinate.project(&narrow_dims).unwrap();
            prop_assert!(narrow_set.contains(&projected), "{} not in expansion of {:?}", projected, narrow);
        }
    }

    #[test]
    fn prop_skypix_cells_come_from_bounded_regions(
        bounded in proptest::sample::subsequence(BOUNDABLE.to_vec(), 0..=2),
        skypix in proptest::sample::subsequence(SKYPIX.to_vec(), 1..=2),
    ) {
        let catalog = open(shared_repo());
        let universe = catalog.universe();
        let mut engine = ExpansionEngine::new(universe).unwrap();
        let names: Vec<&str> = bounded.iter().chain(&skypix).copied().collect();
        let dims = universe.extract(&names).unwrap();
        let frontier = KeySpaceSplitter::new(universe).unwrap().split(universe, &dims).unwrap().boundable;

        let expanded = engine.expand_dimensions(&catalog, &dims).unwrap();
        let resolved: BTreeSet<DataCoordinate> =
            BoundedResolver::resolve(&catalog, &mut CoordinateCache::new(), &frontier)
                .unwrap()
                .iter()
                .cloned()
                .collect();
        let fallback = if universe.is_spatial(&frontier) {
            None
        } else {
            engine.spatial_bounds(&catalog).unwrap()
        };

        for coordinate in expanded.iter() {
            let projected = coordinate.project(&frontier).unwrap();
            let source = resolved.get(&projected);
            prop_assert!(source.is_some(), "{} not resolved over {}", projected, frontier);
            let region = fallback.or_else(|| source.and_then(|s| s.region().copied()));
            prop_assert!(region.is_some(), "{} expanded without a region", coordinate);
            let region = region.unwrap();

            for name in &skypix {
                let index = coordinate.get(name).and_then(KeyValue::as_int).unwrap();
                let cell = universe.pixelization(name).unwrap().cell(u64::try_from(index).unwrap()).unwrap();
                prop_assert!(cell.overlaps(&region), "{} cell {} misses {:?}", name, index, region);
            }
        }
    }
}

#[test]
fn test_skypix_frontiers_are_reused() {
    let catalog = CountingCatalog::new(open(shared_repo()));
    let universe = DimensionUniverse::standard();
    let mut engine = ExpansionEngine::new(&universe).unwrap();

    let both = universe.extract(["tract", "grid5", "grid7"]).unwrap();
    let expanded = engine.expand_dimensions(&catalog, &both).unwrap();
    assert!(!expanded.is_empty());
    assert!(catalog.count("expand_coordinate") > 0);

    // grid7 folds first, so {tract, grid7} is an intermediate frontier
    let fine = universe.extract(["tract", "grid7"]).unwrap();
    assert!(engine.cache().contains(&fine));
    catalog.reset();
    let hits = engine.cache().stats().hits;
    let reused = engine.expand_dimensions(&catalog, &fine).unwrap();
    assert!(!reused.is_empty());
    assert_eq!(engine.cache().stats().hits, hits + 1);
    assert_eq!(catalog.count("expand_coordinate"), 0);
    assert_eq!(catalog.count("query_coordinates"), 0);
}

/// Catalog calls made while materializing `dataset_types` into a fresh
/// base repository
struct Materialization {
    written: Vec<usize>,
    queries: usize,
    expansions: usize,
    puts: usize,
}

fn materialize(dataset_types: &[DatasetType]) -> Materialization {
    let dir = tempfile::tempdir().unwrap();
    let root = base_repo(dir.path());
    let mut counting = CountingCatalog::new(open(&root));
    let mut maker = MockDatasetMaker::new(&mut counting).unwrap();
    let written = dataset_types
        .iter()
        .map(|dataset_type| maker.make_datasets(dataset_type, MISC_INPUT_RUN).unwrap().count())
        .collect();
    assert!(maker.engine().cache().stats().misses >= 1);
    drop(maker);
    Materialization {
        written,
        queries: counting.count("query_coordinates"),
        expansions: counting.count("expand_coordinate"),
        puts: counting.count("put_dataset"),
    }
}

#[test]
fn test_identical_dimensions_query_catalog_once() {
    let universe = DimensionUniverse::standard();
    let dims = universe.extract(["exposure", "detector"]).unwrap();
    let first = DatasetType::new(mock_name("icExp"), dims.clone(), mock_name("ExposureF"));
    let second = DatasetType::new(mock_name("icSrc"), dims, mock_name("SourceCatalog"));

    let alone = materialize(&[first.clone()]);
    assert_eq!(alone.written, vec![EXPOSURES * DETECTORS]);
    assert!(alone.queries >= 1);
    let together = materialize(&[first, second]);
    assert_eq!(together.written, vec![EXPOSURES * DETECTORS; 2]);
    assert_eq!(together.queries, alone.queries);
    assert_eq!(together.puts, 2 * EXPOSURES * DETECTORS);
}

#[test]
fn test_identical_skypix_dimensions_expand_once() {
    let universe = DimensionUniverse::standard();
    let dims = universe.extract(["tract", "grid7"]).unwrap();
    let first = DatasetType::new(mock_name("deepCoaddCells"), dims.clone(), mock_name("ExposureF"));
    let second = DatasetType::new(mock_name("deepCoaddCellSources"), dims, mock_name("SourceCatalog"));

    let alone = materialize(&[first.clone()]);
    assert!(alone.written[0] > 0);
    assert!(alone.expansions >= alone.written[0]);
    let together = materialize(&[first, second]);
    assert_eq!(together.written, vec![alone.written[0]; 2]);
    assert_eq!(together.queries, alone.queries);
    assert_eq!(together.expansions, alone.expansions);
}

#[test]
fn test_prep_writes_only_missing_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let root = base_repo(dir.path());
    let pipeline = write_pipeline(dir.path());

    // raw, bias and flat come with the base repository; skyMap is real
    assert_eq!(prep(&root, &pipeline, MISC_INPUT_RUN).unwrap(), 1);
    assert_eq!(prep(&root, &pipeline, MISC_INPUT_RUN).unwrap(), 0);

    let catalog = open(&root);
    let schema = catalog
        .query_datasets("_mock_sourceTableSchema", &[MISC_INPUT_RUN.to_string()])
        .unwrap();
    assert_eq!(schema.len(), 1);
    assert!(schema[0].data_id.values().is_empty());
}
