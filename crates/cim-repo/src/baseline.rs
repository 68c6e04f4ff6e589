//! Baseline dataset types every base repository carries

use crate::config::FixtureConfig;
use crate::error::RepoError;
use cim_catalog::DatasetType;
use cim_dimensions::DimensionUniverse;
use cim_mock::mock_name;
use indexmap::IndexMap;

/// Which configured collection a baseline type is written into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaselineRun {
    Raw,
    Calibration,
    Refcat,
    Misc,
}

impl BaselineRun {
    #[must_use]
    pub fn resolve(self, config: &FixtureConfig) -> &str {
        match self {
            Self::Raw => &config.raw_run,
            Self::Calibration => &config.calib_run,
            Self::Refcat => &config.refcat_run,
            Self::Misc => &config.misc_run,
        }
    }
}

/// One baseline dataset type, named before mocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineType {
    pub name: &'static str,
    pub dimensions: &'static [&'static str],
    pub storage_class: &'static str,
    pub run: BaselineRun,
}

impl BaselineType {
    /// The mocked dataset type
    pub fn dataset_type(&self, universe: &DimensionUniverse) -> Result<DatasetType, RepoError> {
        Ok(DatasetType::new(
            mock_name(self.name),
            universe.extract(self.dimensions)?,
            mock_name(self.storage_class),
        ))
    }
}

pub const BASELINE_DATASET_TYPES: [BaselineType; 5] = [
    BaselineType {
        name: "raw",
        dimensions: &["exposure", "detector"],
        storage_class: "Exposure",
        run: BaselineRun::Raw,
    },
    BaselineType {
        name: "bias",
        dimensions: &["detector"],
        storage_class: "ExposureF",
        run: BaselineRun::Calibration,
    },
    BaselineType {
        name: "flat",
        dimensions: &["detector", "physical_filter"],
        storage_class: "ExposureF",
        run: BaselineRun::Calibration,
    },
    BaselineType {
        name: "ps1_pv3_3pi_20170110",
        dimensions: &["grid7"],
        storage_class: "SimpleCatalog",
        run: BaselineRun::Refcat,
    },
    BaselineType {
        name: "fgcmLookUpTable",
        dimensions: &["instrument"],
        storage_class: "Catalog",
        run: BaselineRun::Misc,
    },
];

/// Mocked baseline types grouped by target run, in first-seen order
pub fn baseline_by_run(
    config: &FixtureConfig,
    universe: &DimensionUniverse,
) -> Result<IndexMap<String, Vec<DatasetType>>, RepoError> {
    let mut grouped: IndexMap<String, Vec<DatasetType>> = IndexMap::new();
    for baseline in &BASELINE_DATASET_TYPES {
        grouped
            .entry(baseline.run.resolve(config).to_string())
            .or_default()
            .push(baseline.dataset_type(universe)?);
    }
    Ok(grouped)
}
