//! Base repository bootstrap

use crate::baseline::baseline_by_run;
use crate::config::FixtureConfig;
use crate::error::RepoError;
use crate::records::{InstrumentRecords, ObservationRecords};
use crate::tiling::SkyTiling;
use cim_catalog::{Catalog, CollectionKind, DimensionRecord, LocalCatalog};
use cim_dimensions::DimensionUniverse;
use cim_mock::MockDatasetMaker;
use std::path::Path;
use tracing::info;

/// What [`RepoBootstrapper::bootstrap`] found or built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Root already existed and was left untouched
    Existing,
    /// Fresh repository with this many mock datasets
    Created { datasets: usize },
}

/// Builds base repositories from a [`FixtureConfig`]
#[derive(Debug, Clone, Default)]
pub struct RepoBootstrapper {
    config: FixtureConfig,
}

impl RepoBootstrapper {
    #[must_use]
    pub fn new(config: FixtureConfig) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// Create a populated repository at `root`.
    ///
    /// An existing `root` is left alone unless `clobber` is set, in which
    /// case it is deleted first. A failure partway leaves a partially
    /// populated repository behind.
    pub fn bootstrap(&self, root: &Path, clobber: bool) -> Result<BootstrapOutcome, RepoError> {
        if root.exists() {
            if !clobber {
                info!(root = %root.display(), "repository exists, leaving it as is");
                return Ok(BootstrapOutcome::Existing);
            }
            std::fs::remove_dir_all(root).map_err(|e| RepoError::io(root, e))?;
        }
        self.config.validate()?;
        info!(root = %root.display(), "bootstrapping repository");
        let mut catalog = LocalCatalog::create(root, DimensionUniverse::standard())?;
        let datasets = self.populate(&mut catalog)?;
        Ok(BootstrapOutcome::Created { datasets })
    }

    /// Fill an empty catalog, returning the number of mock datasets written
    pub fn populate<C: Catalog + ?Sized>(&self, catalog: &mut C) -> Result<usize, RepoError> {
        let config = &self.config;
        let instrument = InstrumentRecords::bundled()?.select(config);
        if instrument.instrument.name != config.instrument {
            return Err(RepoError::InvalidFixture(format!(
                "bundled records describe {}, not {}",
                instrument.instrument.name, config.instrument
            )));
        }
        insert_all(catalog, instrument.dimension_records())?;

        let observations = ObservationRecords::bundled()?.select(config, &instrument.physical_filter);
        if observations.visit.is_empty() {
            return Err(RepoError::InvalidFixture("no visits left after detector and band selection".into()));
        }
        insert_all(catalog, observations.dimension_records(&config.instrument))?;

        SkyTiling::new(config.skymap.as_str(), &config.tiling)?.register(catalog, &config.skymap_run)?;

        let universe = catalog.universe().clone();
        let mut written = 0;
        {
            let mut maker = MockDatasetMaker::new(&mut *catalog)?;
            for (run, dataset_types) in baseline_by_run(config, &universe)? {
                for dataset_type in &dataset_types {
                    written += maker.make_datasets(dataset_type, &run)?.count();
                }
            }
        }

        catalog.register_collection(&config.calib_run, CollectionKind::Run)?;
        catalog.register_collection(&config.calib_collection, CollectionKind::Chained)?;
        catalog.set_collection_chain(&config.calib_collection, &[config.calib_run.clone()])?;

        let defaults = [
            config.raw_run.clone(),
            config.calib_collection.clone(),
            config.refcat_run.clone(),
            config.skymap_run.clone(),
            config.misc_run.clone(),
        ];
        for run in [&config.raw_run, &config.refcat_run, &config.misc_run] {
            catalog.register_collection(run, CollectionKind::Run)?;
        }
        catalog.register_collection(&config.defaults_collection, CollectionKind::Chained)?;
        catalog.set_collection_chain(&config.defaults_collection, &defaults)?;
        info!(
            defaults = %config.defaults_collection,
            datasets = written,
            "base repository populated"
        );
        Ok(written)
    }
}

fn insert_all<C: Catalog + ?Sized>(
    catalog: &mut C,
    records: Vec<(&'static str, Vec<DimensionRecord>)>,
) -> Result<(), RepoError> {
    for (element, rows) in records {
        catalog.insert_records(element, rows)?;
    }
    Ok(())
}

/// Bootstrap `root` with the default fixture
pub fn bootstrap(root: &Path, clobber: bool) -> Result<BootstrapOutcome, RepoError> {
    RepoBootstrapper::default().bootstrap(root, clobber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::SKYMAP_DATASET_TYPE;
    use cim_dimensions::KeyValue;
    use pretty_assertions::assert_eq;

    fn open(root: &Path) -> LocalCatalog {
        LocalCatalog::open(root, DimensionUniverse::standard()).unwrap()
    }

    #[test]
    fn defaults_chain_lists_every_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("base");
        let outcome = bootstrap(&root, false).unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Created { datasets } if datasets > 0));

        let catalog = open(&root);
        assert_eq!(
            catalog.flatten_collection("HSC/defaults").unwrap(),
            vec!["HSC/raw/all", "HSC/calib/unbounded", "refcats", "skymaps", "HSC/misc"]
        );
        let defaults = vec!["HSC/defaults".to_string()];
        assert_eq!(catalog.query_datasets(SKYMAP_DATASET_TYPE, &defaults).unwrap().len(), 1);
        // six detectors, two bands' worth of filters
        assert_eq!(catalog.query_datasets("_mock_bias", &defaults).unwrap().len(), 6);
        assert!(!catalog.query_datasets("_mock_ps1_pv3_3pi_20170110", &defaults).unwrap().is_empty());
    }

    #[test]
    fn raw_covers_retained_detectors_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("base");
        bootstrap(&root, false).unwrap();
        let catalog = open(&root);
        let raws = catalog.query_datasets("_mock_raw", &["HSC/raw/all".to_string()]).unwrap();
        let config = FixtureConfig::default();
        for raw in &raws {
            let detector = raw.data_id.get("detector").and_then(KeyValue::as_int).unwrap();
            assert!(config.detectors.contains(&detector));
        }
        // four exposures on six detectors
        assert_eq!(raws.len(), 24);
    }

    #[test]
    fn existing_root_is_left_alone_without_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("base");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("marker"), b"keep").unwrap();

        assert_eq!(bootstrap(&root, false).unwrap(), BootstrapOutcome::Existing);
        assert!(root.join("marker").exists());

        let outcome = bootstrap(&root, true).unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Created { .. }));
        assert!(!root.join("marker").exists());
    }

    #[test]
    fn mismatched_instrument_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = FixtureConfig {
            instrument: "LSSTCam".into(),
            ..FixtureConfig::default()
        };
        let err = RepoBootstrapper::new(config)
            .bootstrap(&dir.path().join("base"), false)
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
