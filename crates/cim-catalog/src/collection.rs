//! Collections: runs and chains

use crate::error::CatalogError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Kind of collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Append-only grouping datasets are written into
    Run,
    /// Ordered search path over other collections
    Chained,
}

impl Display for CollectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Chained => write!(f, "chained"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CollectionRecord {
    pub(crate) kind: CollectionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) children: Vec<String>,
}

/// Expand `name` into the run collections it searches, in order, keeping
/// the first occurrence of each run
pub(crate) fn flatten(
    collections: &IndexMap<String, CollectionRecord>,
    name: &str,
) -> Result<Vec<String>, CatalogError> {
    let mut runs = Vec::new();
    let mut path = Vec::new();
    visit(collections, name, &mut path, &mut runs)?;
    Ok(runs)
}

fn visit(
    collections: &IndexMap<String, CollectionRecord>,
    name: &str,
    path: &mut Vec<String>,
    runs: &mut Vec<String>,
) -> Result<(), CatalogError> {
    let record = collections
        .get(name)
        .ok_or_else(|| CatalogError::UnknownCollection(name.to_string()))?;
    match record.kind {
        CollectionKind::Run => {
            if !runs.iter().any(|r| r == name) {
                runs.push(name.to_string());
            }
        }
        CollectionKind::Chained => {
            if path.iter().any(|p| p == name) {
                return Err(CatalogError::ChainCycle(name.to_string()));
            }
            path.push(name.to_string());
            for child in &record.children {
                visit(collections, child, path, runs)?;
            }
            path.pop();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> CollectionRecord {
        CollectionRecord {
            kind: CollectionKind::Run,
            children: Vec::new(),
        }
    }

    fn chain(children: &[&str]) -> CollectionRecord {
        CollectionRecord {
            kind: CollectionKind::Chained,
            children: children.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn nested_chains_flatten_in_order() {
        let mut collections = IndexMap::new();
        collections.insert("a".to_string(), run());
        collections.insert("b".to_string(), run());
        collections.insert("inner".to_string(), chain(&["b", "a"]));
        collections.insert("outer".to_string(), chain(&["a", "inner"]));

        assert_eq!(flatten(&collections, "outer").unwrap(), vec!["a", "b"]);
        assert_eq!(flatten(&collections, "b").unwrap(), vec!["b"]);
    }

    #[test]
    fn cycles_detected() {
        let mut collections = IndexMap::new();
        collections.insert("x".to_string(), chain(&["y"]));
        collections.insert("y".to_string(), chain(&["x"]));
        assert!(matches!(
            flatten(&collections, "x"),
            Err(CatalogError::ChainCycle(_))
        ));
    }
}
