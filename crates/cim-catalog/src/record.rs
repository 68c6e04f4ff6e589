//! Dimension records

use cim_dimensions::{DimensionSet, KeyValue, Region};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of a dimension or join element
///
/// `keys` identify the record (the element's own value plus everything it
/// requires), `implied` holds the values it determines for implied
/// dimensions, and `fields` carries free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRecord {
    pub keys: BTreeMap<String, KeyValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub implied: BTreeMap<String, KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl DimensionRecord {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = (S, KeyValue)>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            implied: BTreeMap::new(),
            region: None,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_implied(mut self, dimension: &str, value: impl Into<KeyValue>) -> Self {
        self.implied.insert(dimension.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn key(&self, name: &str) -> Option<&KeyValue> {
        self.keys.get(name)
    }

    #[must_use]
    pub fn key_set(&self) -> DimensionSet {
        self.keys.keys().cloned().collect()
    }

    /// Whether every key of this record has the same value in `values`
    #[must_use]
    pub fn matches(&self, values: &BTreeMap<String, KeyValue>) -> bool {
        self.keys.iter().all(|(k, v)| values.get(k) == Some(v))
    }
}
