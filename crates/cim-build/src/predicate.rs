//! Data-selection predicates
//!
//! A small subset of the data query language: `key = value`,
//! `key != value` and `key IN (a, b, ...)` terms joined by `AND`. Values are
//! integers or (optionally quoted) strings. The empty query selects
//! everything.

use crate::error::BuildError;
use cim_dimensions::{DataCoordinate, KeyValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

static CONJUNCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+AND\s+").expect("valid regex"));
static COMPARISON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\w+)\s*(!=|=)\s*(\S.*?)\s*$").expect("valid regex"));
static MEMBERSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\w+)\s+IN\s*\((.*)\)\s*$").expect("valid regex"));

/// One condition on a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Term {
    Equals { key: String, value: KeyValue },
    NotEquals { key: String, value: KeyValue },
    In { key: String, values: Vec<KeyValue> },
}

impl Term {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Equals { key, .. } | Self::NotEquals { key, .. } | Self::In { key, .. } => key,
        }
    }

    /// Terms on keys the coordinate does not carry do not constrain it
    #[must_use]
    pub fn matches(&self, data_id: &DataCoordinate) -> bool {
        let Some(actual) = data_id.get(self.key()) else {
            return true;
        };
        match self {
            Self::Equals { value, .. } => actual == value,
            Self::NotEquals { value, .. } => actual != value,
            Self::In { values, .. } => values.contains(actual),
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { key, value } => write!(f, "{key} = {}", literal(value)),
            Self::NotEquals { key, value } => write!(f, "{key} != {}", literal(value)),
            Self::In { key, values } => {
                let values: Vec<String> = values.iter().map(literal).collect();
                write!(f, "{key} IN ({})", values.join(", "))
            }
        }
    }
}

fn literal(value: &KeyValue) -> String {
    match value {
        KeyValue::Int(v) => v.to_string(),
        KeyValue::Str(v) => format!("'{v}'"),
    }
}

/// Conjunction of terms over data-coordinate keys
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataPredicate {
    terms: Vec<Term>,
}

impl DataPredicate {
    /// Predicate that selects everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(query: &str) -> Result<Self, BuildError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Self::all());
        }
        let invalid = |reason: &str| BuildError::InvalidPredicate {
            query: query.to_string(),
            reason: reason.to_string(),
        };

        let mut terms = Vec::new();
        for clause in CONJUNCTION.split(query) {
            if let Some(captures) = MEMBERSHIP.captures(clause) {
                let values: Vec<KeyValue> = captures[2]
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(KeyValue::parse_literal)
                    .collect();
                if values.is_empty() {
                    return Err(invalid("IN list is empty"));
                }
                terms.push(Term::In {
                    key: captures[1].to_string(),
                    values,
                });
            } else if let Some(captures) = COMPARISON.captures(clause) {
                let key = captures[1].to_string();
                let value = KeyValue::parse_literal(&captures[3]);
                terms.push(match &captures[2] {
                    "=" => Term::Equals { key, value },
                    _ => Term::NotEquals { key, value },
                });
            } else {
                return Err(invalid(&format!("cannot parse term {:?}", clause.trim())));
            }
        }
        Ok(Self { terms })
    }

    #[inline]
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.terms.is_empty()
    }

    #[must_use]
    pub fn matches(&self, data_id: &DataCoordinate) -> bool {
        self.terms.iter().all(|term| term.matches(data_id))
    }
}

impl FromStr for DataPredicate {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for DataPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.terms.iter().map(ToString::to_string).collect();
        f.write_str(&terms.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_dimensions::DimensionUniverse;

    fn visit_detector(visit: i64, detector: i64) -> DataCoordinate {
        let universe = DimensionUniverse::standard();
        let dims = universe.extract(["visit", "detector"]).unwrap();
        DataCoordinate::from_pairs(
            &dims,
            [
                ("instrument", KeyValue::from("HSC")),
                ("band", KeyValue::from("r")),
                ("physical_filter", KeyValue::from("HSC-R")),
                ("visit", KeyValue::from(visit)),
                ("detector", KeyValue::from(detector)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn empty_query_selects_everything() {
        let predicate = DataPredicate::parse("  ").unwrap();
        assert!(predicate.is_all());
        assert!(predicate.matches(&visit_detector(96860, 42)));
    }

    #[test]
    fn conjunction_of_terms() {
        let predicate = DataPredicate::parse("instrument = 'HSC' and visit IN (96860, 96862) AND detector != 41").unwrap();
        assert_eq!(predicate.terms().len(), 3);
        assert!(predicate.matches(&visit_detector(96860, 42)));
        assert!(!predicate.matches(&visit_detector(96860, 41)));
        assert!(!predicate.matches(&visit_detector(95104, 42)));
    }

    #[test]
    fn absent_keys_do_not_constrain() {
        let predicate = DataPredicate::parse("tract = 0").unwrap();
        assert!(predicate.matches(&visit_detector(96860, 42)));
    }

    #[test]
    fn display_round_trips() {
        let predicate = DataPredicate::parse("band IN ('r', 'i') AND detector=42").unwrap();
        assert_eq!(predicate.to_string(), "band IN ('r', 'i') AND detector = 42");
        assert_eq!(DataPredicate::parse(&predicate.to_string()).unwrap(), predicate);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = DataPredicate::parse("detector > 4").unwrap_err();
        assert!(err.is_configuration());
        assert!(DataPredicate::parse("band IN ()").is_err());
    }
}
