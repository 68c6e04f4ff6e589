//! Fixture dimension records
//!
//! Two bundled JSON files hold the records a real instrument registration
//! and raw ingest would produce: [`InstrumentRecords`] (instrument, physical
//! filters, detectors) and [`ObservationRecords`] (exposures, visits, visit
//! definitions and per-detector visit regions). Both can be written back out
//! from a populated catalog so the bundled files can be regenerated.

use crate::config::FixtureConfig;
use crate::error::RepoError;
use cim_catalog::{Catalog, DimensionRecord};
use cim_dimensions::{KeyValue, Region};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const INSTRUMENT_RECORDS: &str = include_str!("data/instrument-records.json");
const OBSERVATION_RECORDS: &str = include_str!("data/observation-records.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub name: String,
    pub class_name: String,
    pub detector_max: i64,
    pub visit_max: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalFilterInfo {
    pub name: String,
    pub band: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub id: i64,
    pub full_name: String,
    pub raft: String,
    pub purpose: String,
}

/// Records written by instrument registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecords {
    pub instrument: InstrumentInfo,
    #[serde(default)]
    pub physical_filter: Vec<PhysicalFilterInfo>,
    #[serde(default)]
    pub detector: Vec<DetectorInfo>,
}

impl InstrumentRecords {
    /// Records shipped with this crate
    pub fn bundled() -> Result<Self, RepoError> {
        parse(INSTRUMENT_RECORDS, "instrument-records.json")
    }

    pub fn read(path: &Path) -> Result<Self, RepoError> {
        read_json(path)
    }

    pub fn write(&self, path: &Path) -> Result<(), RepoError> {
        write_json(self, path)
    }

    /// Keep only the configured detectors and the filters of configured bands
    #[must_use]
    pub fn select(&self, config: &FixtureConfig) -> Self {
        Self {
            instrument: self.instrument.clone(),
            physical_filter: self
                .physical_filter
                .iter()
                .filter(|f| config.bands.contains(&f.band))
                .cloned()
                .collect(),
            detector: self
                .detector
                .iter()
                .filter(|d| config.detectors.contains(&d.id))
                .cloned()
                .collect(),
        }
    }

    /// Distinct bands of the physical filters, sorted
    #[must_use]
    pub fn bands(&self) -> BTreeSet<&str> {
        self.physical_filter.iter().map(|f| f.band.as_str()).collect()
    }

    /// Catalog records per element, in insertion order
    #[must_use]
    pub fn dimension_records(&self) -> Vec<(&'static str, Vec<DimensionRecord>)> {
        let name = self.instrument.name.as_str();
        let instrument = DimensionRecord::new([("instrument", KeyValue::from(name))])
            .with_field("class_name", self.instrument.class_name.as_str())
            .with_field("detector_max", self.instrument.detector_max)
            .with_field("visit_max", self.instrument.visit_max);
        let bands = self
            .bands()
            .into_iter()
            .map(|band| DimensionRecord::new([("band", KeyValue::from(band))]))
            .collect();
        let filters = self
            .physical_filter
            .iter()
            .map(|f| {
                DimensionRecord::new([
                    ("instrument", KeyValue::from(name)),
                    ("physical_filter", KeyValue::from(f.name.as_str())),
                ])
                .with_implied("band", f.band.as_str())
            })
            .collect();
        let detectors = self
            .detector
            .iter()
            .map(|d| {
                DimensionRecord::new([("instrument", KeyValue::from(name)), ("detector", KeyValue::from(d.id))])
                    .with_field("full_name", d.full_name.as_str())
                    .with_field("raft", d.raft.as_str())
                    .with_field("purpose", d.purpose.as_str())
            })
            .collect();
        vec![
            ("instrument", vec![instrument]),
            ("band", bands),
            ("physical_filter", filters),
            ("detector", detectors),
        ]
    }

    /// Read the records of `instrument` back out of a catalog
    pub fn from_catalog<C: Catalog + ?Sized>(catalog: &C, instrument: &str) -> Result<Self, RepoError> {
        let ours = |record: &DimensionRecord| record.key("instrument").and_then(KeyValue::as_str) == Some(instrument);
        let record = catalog
            .records("instrument")
            .into_iter()
            .find(|r| ours(r))
            .ok_or_else(|| RepoError::InvalidFixture(format!("no instrument record for {instrument}")))?;
        let info = InstrumentInfo {
            name: instrument.to_string(),
            class_name: text_field(&record, "instrument", "class_name")?,
            detector_max: int_field(&record, "instrument", "detector_max")?,
            visit_max: int_field(&record, "instrument", "visit_max")?,
        };
        let physical_filter = catalog
            .records("physical_filter")
            .iter()
            .filter(|&r| ours(r))
            .map(|r| {
                Ok(PhysicalFilterInfo {
                    name: str_key(&r.keys, "physical_filter", "physical_filter")?,
                    band: str_key(&r.implied, "physical_filter", "band")?,
                })
            })
            .collect::<Result<_, RepoError>>()?;
        let detector = catalog
            .records("detector")
            .iter()
            .filter(|&r| ours(r))
            .map(|r| {
                Ok(DetectorInfo {
                    id: int_key(&r.keys, "detector", "detector")?,
                    full_name: text_field(r, "detector", "full_name")?,
                    raft: text_field(r, "detector", "raft")?,
                    purpose: text_field(r, "detector", "purpose")?,
                })
            })
            .collect::<Result<_, RepoError>>()?;
        Ok(Self {
            instrument: info,
            physical_filter,
            detector,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureInfo {
    pub id: i64,
    pub physical_filter: String,
    pub day_obs: i64,
    pub exposure_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitInfo {
    pub id: i64,
    pub physical_filter: String,
    pub day_obs: i64,
    pub region: Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitDefinition {
    pub visit: i64,
    pub exposure: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitDetectorRegion {
    pub visit: i64,
    pub detector: i64,
    pub region: Region,
}

/// Records written by raw ingest and visit definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecords {
    #[serde(default)]
    pub exposure: Vec<ExposureInfo>,
    #[serde(default)]
    pub visit: Vec<VisitInfo>,
    #[serde(default)]
    pub visit_definition: Vec<VisitDefinition>,
    #[serde(default)]
    pub visit_detector_region: Vec<VisitDetectorRegion>,
}

impl ObservationRecords {
    /// Records shipped with this crate
    pub fn bundled() -> Result<Self, RepoError> {
        parse(OBSERVATION_RECORDS, "observation-records.json")
    }

    pub fn read(path: &Path) -> Result<Self, RepoError> {
        read_json(path)
    }

    pub fn write(&self, path: &Path) -> Result<(), RepoError> {
        write_json(self, path)
    }

    /// Keep the observations taken through `filters` on the configured
    /// detectors.
    ///
    /// Visit regions are recomputed as the union of the retained detector
    /// regions; a visit with no retained detector is dropped.
    #[must_use]
    pub fn select(&self, config: &FixtureConfig, filters: &[PhysicalFilterInfo]) -> Self {
        let kept_filter = |name: &str| filters.iter().any(|f| f.name == name);
        let exposure: Vec<ExposureInfo> = self
            .exposure
            .iter()
            .filter(|e| kept_filter(&e.physical_filter))
            .cloned()
            .collect();
        let candidates: BTreeSet<i64> = self
            .visit
            .iter()
            .filter(|v| kept_filter(&v.physical_filter))
            .map(|v| v.id)
            .collect();
        let visit_detector_region: Vec<VisitDetectorRegion> = self
            .visit_detector_region
            .iter()
            .filter(|r| candidates.contains(&r.visit) && config.detectors.contains(&r.detector))
            .cloned()
            .collect();

        let mut regions: BTreeMap<i64, Region> = BTreeMap::new();
        for vdr in &visit_detector_region {
            regions
                .entry(vdr.visit)
                .and_modify(|region| *region = region.union(&vdr.region))
                .or_insert(vdr.region);
        }
        let visit: Vec<VisitInfo> = self
            .visit
            .iter()
            .filter_map(|v| {
                regions.get(&v.id).map(|region| VisitInfo {
                    region: *region,
                    ..v.clone()
                })
            })
            .collect();
        let exposures: BTreeSet<i64> = exposure.iter().map(|e| e.id).collect();
        let visit_definition = self
            .visit_definition
            .iter()
            .filter(|d| regions.contains_key(&d.visit) && exposures.contains(&d.exposure))
            .copied()
            .collect();

        Self {
            exposure,
            visit,
            visit_definition,
            visit_detector_region,
        }
    }

    /// Catalog records per element, in insertion order.
    ///
    /// Visit definitions are carried on each visit record as its
    /// `exposures` field.
    #[must_use]
    pub fn dimension_records(&self, instrument: &str) -> Vec<(&'static str, Vec<DimensionRecord>)> {
        let mut definitions: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for d in &self.visit_definition {
            definitions.entry(d.visit).or_default().push(d.exposure);
        }
        let exposures = self
            .exposure
            .iter()
            .map(|e| {
                DimensionRecord::new([("instrument", KeyValue::from(instrument)), ("exposure", KeyValue::from(e.id))])
                    .with_implied("physical_filter", e.physical_filter.as_str())
                    .with_field("day_obs", e.day_obs)
                    .with_field("exposure_time", e.exposure_time)
            })
            .collect();
        let visits = self
            .visit
            .iter()
            .map(|v| {
                DimensionRecord::new([("instrument", KeyValue::from(instrument)), ("visit", KeyValue::from(v.id))])
                    .with_implied("physical_filter", v.physical_filter.as_str())
                    .with_region(v.region)
                    .with_field("day_obs", v.day_obs)
                    .with_field("exposures", definitions.get(&v.id).cloned().unwrap_or_default())
            })
            .collect();
        let regions = self
            .visit_detector_region
            .iter()
            .map(|r| {
                DimensionRecord::new([
                    ("instrument", KeyValue::from(instrument)),
                    ("visit", KeyValue::from(r.visit)),
                    ("detector", KeyValue::from(r.detector)),
                ])
                .with_region(r.region)
            })
            .collect();
        vec![
            ("exposure", exposures),
            ("visit", visits),
            ("visit_detector_region", regions),
        ]
    }

    /// Read the observations of `instrument` back out of a catalog
    pub fn from_catalog<C: Catalog + ?Sized>(catalog: &C, instrument: &str) -> Result<Self, RepoError> {
        let ours = |record: &&DimensionRecord| {
            record.key("instrument").and_then(KeyValue::as_str) == Some(instrument)
        };
        let exposure_records = catalog.records("exposure");
        let exposure = exposure_records
            .iter()
            .filter(ours)
            .map(|r| {
                Ok(ExposureInfo {
                    id: int_key(&r.keys, "exposure", "exposure")?,
                    physical_filter: str_key(&r.implied, "exposure", "physical_filter")?,
                    day_obs: int_field(r, "exposure", "day_obs")?,
                    exposure_time: r
                        .fields
                        .get("exposure_time")
                        .and_then(serde_json::Value::as_f64)
                        .ok_or_else(|| missing("exposure", "exposure_time"))?,
                })
            })
            .collect::<Result<_, RepoError>>()?;

        let mut visit = Vec::new();
        let mut visit_definition = Vec::new();
        for r in catalog.records("visit").iter().filter(ours) {
            let id = int_key(&r.keys, "visit", "visit")?;
            if let Some(members) = r.fields.get("exposures").and_then(serde_json::Value::as_array) {
                visit_definition.extend(members.iter().filter_map(serde_json::Value::as_i64).map(|exposure| {
                    VisitDefinition { visit: id, exposure }
                }));
            }
            visit.push(VisitInfo {
                id,
                physical_filter: str_key(&r.implied, "visit", "physical_filter")?,
                day_obs: int_field(r, "visit", "day_obs")?,
                region: r.region.ok_or_else(|| missing("visit", "region"))?,
            });
        }

        let visit_detector_region = catalog
            .records("visit_detector_region")
            .iter()
            .filter(ours)
            .map(|r| {
                Ok(VisitDetectorRegion {
                    visit: int_key(&r.keys, "visit_detector_region", "visit")?,
                    detector: int_key(&r.keys, "visit_detector_region", "detector")?,
                    region: r.region.ok_or_else(|| missing("visit_detector_region", "region"))?,
                })
            })
            .collect::<Result<_, RepoError>>()?;

        Ok(Self {
            exposure,
            visit,
            visit_definition,
            visit_detector_region,
        })
    }
}

fn parse<T: DeserializeOwned>(text: &str, name: &str) -> Result<T, RepoError> {
    serde_json::from_str(text).map_err(|source| RepoError::FixtureData {
        name: name.to_string(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RepoError> {
    let text = std::fs::read_to_string(path).map_err(|e| RepoError::io(path, e))?;
    parse(&text, &path.display().to_string())
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), RepoError> {
    let mut text = serde_json::to_string_pretty(value).map_err(|source| RepoError::FixtureData {
        name: path.display().to_string(),
        source,
    })?;
    text.push('\n');
    std::fs::write(path, text).map_err(|e| RepoError::io(path, e))
}

fn missing(element: &str, name: &str) -> RepoError {
    RepoError::InvalidFixture(format!("{element} record has no {name}"))
}

fn int_key(values: &BTreeMap<String, KeyValue>, element: &str, name: &str) -> Result<i64, RepoError> {
    values.get(name).and_then(KeyValue::as_int).ok_or_else(|| missing(element, name))
}

fn str_key(values: &BTreeMap<String, KeyValue>, element: &str, name: &str) -> Result<String, RepoError> {
    values
        .get(name)
        .and_then(KeyValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(element, name))
}

fn int_field(record: &DimensionRecord, element: &str, name: &str) -> Result<i64, RepoError> {
    record
        .fields
        .get(name)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| missing(element, name))
}

fn text_field(record: &DimensionRecord, element: &str, name: &str) -> Result<String, RepoError> {
    record
        .fields
        .get(name)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(element, name))
}
