//! Coordinate queries over stored dimension records
//!
//! Enumeration walks the dimensions in dependency order and backtracks over
//! each dimension's records, so every required and implied value is already
//! assigned when a record is checked against it.

use crate::error::CatalogError;
use crate::record::DimensionRecord;
use cim_dimensions::{
    CoordinateSet, DataCoordinate, DimensionDef, DimensionError, DimensionSet, DimensionUniverse,
    KeyValue, Pixelization, Region,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;

type Values = BTreeMap<String, KeyValue>;

/// Read-only view used to answer coordinate queries
pub(crate) struct RecordIndex<'a> {
    universe: &'a DimensionUniverse,
    records: &'a IndexMap<String, Vec<DimensionRecord>>,
}

impl<'a> RecordIndex<'a> {
    pub(crate) fn new(
        universe: &'a DimensionUniverse,
        records: &'a IndexMap<String, Vec<DimensionRecord>>,
    ) -> Self {
        Self { universe, records }
    }

    fn records_of(&self, element: &str) -> &'a [DimensionRecord] {
        self.records.get(element).map_or(&[], Vec::as_slice)
    }

    fn lookup(&self, element: &str, values: &Values) -> Option<&'a DimensionRecord> {
        self.records_of(element).iter().find(|r| r.matches(values))
    }

    /// All coordinates over `dimensions` consistent with the records
    pub(crate) fn query(&self, dimensions: &DimensionSet) -> Result<CoordinateSet, CatalogError> {
        if !self.universe.is_closed(dimensions) {
            return Err(CatalogError::NotClosed(dimensions.clone()));
        }
        let order = self.universe.sorted(dimensions);
        if let Some(skypix) = order.iter().find(|def| def.is_skypix()) {
            return Err(CatalogError::UnboundedQuery(skypix.name.clone()));
        }

        let mut result = CoordinateSet::new(dimensions.clone());
        let mut values = Values::new();
        self.assign(dimensions, &order, &mut values, &mut result)?;
        Ok(result)
    }

    fn assign(
        &self,
        dimensions: &DimensionSet,
        order: &[&DimensionDef],
        values: &mut Values,
        out: &mut CoordinateSet,
    ) -> Result<(), CatalogError> {
        let Some((def, rest)) = order.split_first() else {
            return self.complete(dimensions, values, out);
        };
        for record in self.records_of(&def.name) {
            let Some(value) = record.key(&def.name) else {
                continue;
            };
            let required_match = record
                .keys
                .iter()
                .filter(|(k, _)| *k != &def.name)
                .all(|(k, v)| values.get(k) == Some(v));
            let implied_match = record
                .implied
                .iter()
                .all(|(k, v)| values.get(k).map_or(true, |assigned| assigned == v));
            if !(required_match && implied_match) {
                continue;
            }

            values.insert(def.name.clone(), value.clone());
            self.assign(dimensions, rest, values, out)?;
            values.remove(&def.name);
        }
        Ok(())
    }

    fn complete(
        &self,
        dimensions: &DimensionSet,
        values: &Values,
        out: &mut CoordinateSet,
    ) -> Result<(), CatalogError> {
        for join in self.universe.joins_within(dimensions) {
            if self.lookup(&join.name, values).is_none() {
                return Ok(());
            }
        }
        let Ok(region) = self.region_of(dimensions, values) else {
            return Ok(());
        };
        let coordinate = DataCoordinate::new(dimensions, values.clone())?.with_region(region);
        out.insert(coordinate)?;
        Ok(())
    }

    /// Intersection of the most specific region of each spatial family;
    /// `Err(())` when two families are disjoint
    fn region_of(&self, dimensions: &DimensionSet, values: &Values) -> Result<Option<Region>, ()> {
        let mut best: BTreeMap<&str, (u8, Region)> = BTreeMap::new();
        let mut consider = |family: &'a str, rank: u8, region: Option<Region>| {
            if let Some(region) = region {
                match best.get(family) {
                    Some((current, _)) if *current >= rank => {}
                    _ => {
                        best.insert(family, (rank, region));
                    }
                }
            }
        };

        for def in self.universe.sorted(dimensions) {
            let Some(spatial) = def.spatial.as_ref() else {
                continue;
            };
            let region = if def.is_skypix() {
                self.skypix_cell(&def.name, values)
            } else {
                self.lookup(&def.name, values).and_then(|r| r.region)
            };
            consider(self.family_name(&def.name), spatial.rank, region);
        }
        for join in self.universe.joins_within(dimensions) {
            let Some(spatial) = join.spatial.as_ref() else {
                continue;
            };
            let region = self.lookup(&join.name, values).and_then(|r| r.region);
            consider(self.family_name(&join.name), spatial.rank, region);
        }

        let mut regions = best.into_values().map(|(_, region)| region);
        let Some(first) = regions.next() else {
            return Ok(None);
        };
        regions
            .try_fold(first, |acc, region| acc.intersection(&region).ok_or(()))
            .map(Some)
    }

    fn family_name(&self, element: &str) -> &'a str {
        self.universe
            .spatial_family(element)
            .map_or("", |family| family.family.as_str())
    }

    fn skypix_cell(&self, dimension: &str, values: &Values) -> Option<Region> {
        let grid = self.universe.pixelization(dimension)?;
        let index = u64::try_from(values.get(dimension)?.as_int()?).ok()?;
        grid.cell(index)
    }

    /// Validate a coordinate and expand it to `dimensions`
    pub(crate) fn expand(
        &self,
        coordinate: &DataCoordinate,
        dimensions: &DimensionSet,
    ) -> Result<DataCoordinate, CatalogError> {
        let given = coordinate.dimensions();
        if !given.is_subset(dimensions) {
            return Err(DimensionError::NotASubset {
                source_dimensions: given,
                target: dimensions.clone(),
            }
            .into());
        }
        if !self.universe.is_closed(dimensions) {
            return Err(CatalogError::NotClosed(dimensions.clone()));
        }

        let order = self.universe.sorted(dimensions);
        let mut values = coordinate.values().clone();
        loop {
            let mut filled = Vec::new();
            for def in order.iter().filter(|def| !def.is_skypix()) {
                if !values.contains_key(&def.name) {
                    continue;
                }
                let record = self.lookup(&def.name, &values).ok_or_else(|| CatalogError::MissingRecord {
                    element: def.name.clone(),
                    data_id: describe(&values),
                })?;
                for (dimension, implied) in &record.implied {
                    match values.get(dimension) {
                        Some(actual) if actual != implied => {
                            return Err(CatalogError::ImpliedMismatch {
                                element: def.name.clone(),
                                dimension: dimension.clone(),
                                implied: implied.to_string(),
                                actual: actual.to_string(),
                            });
                        }
                        None if dimensions.contains(dimension) => {
                            filled.push((dimension.clone(), implied.clone()));
                        }
                        _ => {}
                    }
                }
            }
            if filled.is_empty() {
                break;
            }
            values.extend(filled);
        }

        for def in order.iter().filter(|def| def.is_skypix()) {
            if let Some(value) = values.get(&def.name) {
                self.check_pixel(&def.name, value)?;
            }
        }

        let data_id = describe(&values);
        let region = self
            .region_of(dimensions, &values)
            .map_err(|()| CatalogError::DisjointRegions(data_id))?;
        Ok(DataCoordinate::new(dimensions, values)?.with_region(region))
    }

    fn check_pixel(&self, dimension: &str, value: &KeyValue) -> Result<(), CatalogError> {
        let out_of_range = || DimensionError::PixelOutOfRange {
            dimension: dimension.to_string(),
            index: value.as_int().unwrap_or(-1),
        };
        let grid = self
            .universe
            .pixelization(dimension)
            .ok_or_else(|| DimensionError::UnknownDimension(dimension.to_string()))?;
        let index = value
            .as_int()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(out_of_range)?;
        if index >= grid.index_count() {
            return Err(out_of_range().into());
        }
        Ok(())
    }

    /// Check that a record's keys identify a record of `element`
    pub(crate) fn validate_record(&self, element: &str, record: &DimensionRecord) -> Result<(), CatalogError> {
        let expected = self.universe.record_keys(element)?;
        let actual = record.key_set();
        if actual != expected {
            return Err(CatalogError::RecordKeys {
                element: element.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

fn describe(values: &Values) -> String {
    let parts: Vec<String> = values.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{{{}}}", parts.join(", "))
}
