//! Fixture configuration
//!
//! Every field has a default matching the standard test repository, so a
//! TOML file only needs the values it changes:
//!
//! ```toml
//! detectors = [41, 42]
//! bands = ["r"]
//!
//! [tiling]
//! patches_per_side = 3
//! ```

use crate::error::RepoError;
use cim_mock::{MISC_INPUT_RUN, UNMOCKED_DATASET_TYPES};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tract layout of the discrete sky tiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// `[lon, lat]` of each tract center, in degrees; the tract id is the
    /// position in this list
    pub tract_centers: Vec<[f64; 2]>,
    /// Half-width of each tract's inner box, in degrees
    pub radius: f64,
    /// Margin added around each tract's inner box, in degrees
    pub tract_overlap: f64,
    pub patches_per_side: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tract_centers: vec![[149.7, 1.1], [148.9, 1.1], [149.7, 1.9], [148.9, 1.9]],
            radius: 0.4,
            tract_overlap: 0.25 / 60.0,
            patches_per_side: 2,
        }
    }
}

impl TilingConfig {
    #[must_use]
    pub fn with_tract_centers(mut self, centers: Vec<[f64; 2]>) -> Self {
        self.tract_centers = centers;
        self
    }

    #[must_use]
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    #[must_use]
    pub fn with_patches_per_side(mut self, patches: u32) -> Self {
        self.patches_per_side = patches;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), RepoError> {
        if self.tract_centers.is_empty() {
            return Err(RepoError::InvalidFixture("tiling has no tracts".into()));
        }
        if self.radius <= 0.0 || self.tract_overlap < 0.0 {
            return Err(RepoError::InvalidFixture(format!(
                "tract radius {} and overlap {} must be positive",
                self.radius, self.tract_overlap
            )));
        }
        if self.patches_per_side == 0 {
            return Err(RepoError::InvalidFixture("tracts need at least one patch".into()));
        }
        Ok(())
    }
}

/// What goes into a bootstrapped base repository and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    pub instrument: String,
    /// Detectors kept from the bundled records
    pub detectors: Vec<i64>,
    /// Bands kept from the bundled records
    pub bands: Vec<String>,
    pub skymap: String,
    pub defaults_collection: String,
    pub misc_run: String,
    pub raw_run: String,
    /// Chain through which calibrations are found
    pub calib_collection: String,
    pub calib_run: String,
    pub refcat_run: String,
    pub skymap_run: String,
    pub unmocked_dataset_types: Vec<String>,
    pub tiling: TilingConfig,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            instrument: "HSC".into(),
            detectors: vec![57, 58, 49, 50, 41, 42],
            bands: vec!["r".into(), "i".into()],
            skymap: "ci_mw".into(),
            defaults_collection: "HSC/defaults".into(),
            misc_run: MISC_INPUT_RUN.into(),
            raw_run: "HSC/raw/all".into(),
            calib_collection: "HSC/calib".into(),
            calib_run: "HSC/calib/unbounded".into(),
            refcat_run: "refcats".into(),
            skymap_run: "skymaps".into(),
            unmocked_dataset_types: UNMOCKED_DATASET_TYPES.iter().map(ToString::to_string).collect(),
            tiling: TilingConfig::default(),
        }
    }
}

impl FixtureConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, RepoError> {
        toml::from_str(text).map_err(|source| RepoError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, RepoError> {
        let text = std::fs::read_to_string(path).map_err(|e| RepoError::io(path, e))?;
        Self::from_toml_str(&text, path)
    }

    pub fn to_toml_string(&self) -> Result<String, RepoError> {
        Ok(toml::to_string_pretty(self)?)
    }

    #[must_use]
    pub fn with_detectors(mut self, detectors: impl IntoIterator<Item = i64>) -> Self {
        self.detectors = detectors.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_bands<I, S>(mut self, bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bands = bands.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_defaults_collection(mut self, collection: impl Into<String>) -> Self {
        self.defaults_collection = collection.into();
        self
    }

    #[must_use]
    pub fn with_misc_run(mut self, run: impl Into<String>) -> Self {
        self.misc_run = run.into();
        self
    }

    #[must_use]
    pub fn with_tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = tiling;
        self
    }

    /// Whether a dataset type keeps its real name
    #[inline]
    #[must_use]
    pub fn is_unmocked(&self, dataset_type: &str) -> bool {
        self.unmocked_dataset_types.iter().any(|name| name == dataset_type)
    }

    pub(crate) fn validate(&self) -> Result<(), RepoError> {
        if self.detectors.is_empty() {
            return Err(RepoError::InvalidFixture("no detectors selected".into()));
        }
        if self.bands.is_empty() {
            return Err(RepoError::InvalidFixture("no bands selected".into()));
        }
        self.tiling.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_toml_keeps_defaults() {
        let text = "detectors = [41, 42]\n\n[tiling]\npatches_per_side = 3\n";
        let config = FixtureConfig::from_toml_str(text, Path::new("fixture.toml")).unwrap();
        assert_eq!(config.detectors, vec![41, 42]);
        assert_eq!(config.bands, vec!["r".to_string(), "i".to_string()]);
        assert_eq!(config.tiling.patches_per_side, 3);
        assert_eq!(config.tiling.tract_centers.len(), 4);
        assert!(config.is_unmocked("skyMap"));
    }

    #[test]
    fn config_survives_toml() {
        let config = FixtureConfig::default().with_bands(["i"]).with_misc_run("HSC/extra");
        let text = config.to_toml_string().unwrap();
        let parsed = FixtureConfig::from_toml_str(&text, Path::new("fixture.toml")).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let err = FixtureConfig::from_toml_str("detectors = \"all\"", Path::new("bad.toml")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let config = FixtureConfig::default().with_detectors([]);
        assert!(config.validate().unwrap_err().is_configuration());
        let tiling = TilingConfig::default().with_patches_per_side(0);
        assert!(FixtureConfig::default().with_tiling(tiling).validate().is_err());
    }
}
