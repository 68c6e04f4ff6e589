//! Discrete sky tiling
//!
//! Tracts are boxes around configured centers, each split into a square
//! grid of patches. A tract's region is its inner box widened by the tract
//! overlap; a patch's region is its share of the inner box widened the same
//! way and clipped to the tract.

use crate::config::TilingConfig;
use crate::error::RepoError;
use cim_catalog::{Catalog, CollectionKind, DatasetRef, DatasetType, DimensionRecord, MockDataset};
use cim_dimensions::{DataCoordinate, DimensionUniverse, KeyValue, Region};
use tracing::info;

/// Unmocked dataset type describing the tiling itself
pub const SKYMAP_DATASET_TYPE: &str = "skyMap";

const SKYMAP_STORAGE_CLASS: &str = "SkyMap";

#[derive(Debug, Clone, PartialEq)]
pub struct PatchInfo {
    pub id: i64,
    /// `(x, y)` position within the tract
    pub index: (u32, u32),
    pub inner: Region,
    pub region: Region,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TractInfo {
    pub id: i64,
    pub inner: Region,
    pub region: Region,
    pub patches: Vec<PatchInfo>,
}

fn widen(region: &Region, margin: f64) -> Region {
    Region::new(
        region.lon_min - margin,
        region.lon_max + margin,
        region.lat_min - margin,
        region.lat_max + margin,
    )
}

/// A named tiling instance
#[derive(Debug, Clone)]
pub struct SkyTiling {
    name: String,
    tracts: Vec<TractInfo>,
}

impl SkyTiling {
    pub fn new(name: impl Into<String>, config: &TilingConfig) -> Result<Self, RepoError> {
        config.validate()?;
        let per_side = config.patches_per_side;
        let width = 2.0 * config.radius / f64::from(per_side);
        let tracts = config
            .tract_centers
            .iter()
            .zip(0i64..)
            .map(|(&[lon, lat], id)| {
                let inner = Region::centered(lon, lat, config.radius, config.radius);
                let region = widen(&inner, config.tract_overlap);
                let patches = (0..per_side)
                    .flat_map(|y| (0..per_side).map(move |x| (x, y)))
                    .map(|(x, y)| {
                        let lon_min = inner.lon_min + f64::from(x) * width;
                        let lat_min = inner.lat_min + f64::from(y) * width;
                        let patch_inner = Region::new(lon_min, lon_min + width, lat_min, lat_min + width);
                        let patch_region = widen(&patch_inner, config.tract_overlap)
                            .intersection(&region)
                            .unwrap_or(patch_inner);
                        PatchInfo {
                            id: i64::from(y * per_side + x),
                            index: (x, y),
                            inner: patch_inner,
                            region: patch_region,
                        }
                    })
                    .collect();
                TractInfo {
                    id,
                    inner,
                    region,
                    patches,
                }
            })
            .collect();
        Ok(Self {
            name: name.into(),
            tracts,
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn tracts(&self) -> &[TractInfo] {
        &self.tracts
    }

    /// Total number of patches over all tracts
    #[must_use]
    pub fn patch_count(&self) -> usize {
        self.tracts.iter().map(|t| t.patches.len()).sum()
    }

    /// Records for `skymap`, `tract` and `patch`, in insertion order
    #[must_use]
    pub fn dimension_records(&self) -> Vec<(&'static str, Vec<DimensionRecord>)> {
        let skymap = || ("skymap", KeyValue::from(self.name.as_str()));
        let tracts = self
            .tracts
            .iter()
            .map(|t| DimensionRecord::new([skymap(), ("tract", KeyValue::from(t.id))]).with_region(t.region))
            .collect();
        let patches = self
            .tracts
            .iter()
            .flat_map(|t| {
                t.patches.iter().map(move |p| {
                    DimensionRecord::new([skymap(), ("tract", KeyValue::from(t.id)), ("patch", KeyValue::from(p.id))])
                        .with_region(p.region)
                        .with_field("cell_x", p.index.0)
                        .with_field("cell_y", p.index.1)
                })
            })
            .collect();
        vec![
            (
                "skymap",
                vec![DimensionRecord::new([skymap()])
                    .with_field("tract_max", self.tracts.len())
                    .with_field("patch_nx_max", self.tracts.first().map_or(0, |t| t.patches.len()))],
            ),
            ("tract", tracts),
            ("patch", patches),
        ]
    }

    pub fn dataset_type(universe: &DimensionUniverse) -> Result<DatasetType, RepoError> {
        Ok(DatasetType::new(
            SKYMAP_DATASET_TYPE,
            universe.extract(["skymap"])?,
            SKYMAP_STORAGE_CLASS,
        ))
    }

    /// Insert the tiling's records and write its `skyMap` dataset into `run`
    pub fn register<C: Catalog + ?Sized>(&self, catalog: &mut C, run: &str) -> Result<DatasetRef, RepoError> {
        for (element, records) in self.dimension_records() {
            catalog.insert_records(element, records)?;
        }
        let dataset_type = Self::dataset_type(catalog.universe())?;
        catalog.register_dataset_type(&dataset_type)?;
        catalog.register_collection(run, CollectionKind::Run)?;
        let data_id = DataCoordinate::from_pairs(&dataset_type.dimensions, [("skymap", KeyValue::from(self.name.as_str()))])?;
        let payload = MockDataset::new(&dataset_type, &data_id, run);
        let dataset = catalog.put_dataset(payload, &dataset_type, &data_id, run)?;
        info!(
            skymap = %self.name,
            tracts = self.tracts.len(),
            patches = self.patch_count(),
            run,
            "registered sky tiling"
        );
        Ok(dataset)
    }
}
