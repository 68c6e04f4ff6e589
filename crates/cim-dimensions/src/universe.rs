//! The dimension universe
//!
//! A [`DimensionUniverse`] is the fixed graph of dimensions a catalog is
//! built on. Definitions are stored in dependency order: every dimension a
//! definition requires or implies appears before it, so iteration order is
//! also a valid topological order.

use crate::error::DimensionError;
use crate::pixelization::EqualAngleGrid;
use crate::set::DimensionSet;
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// How the values of a dimension are constrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    /// Top-level namespace (instrument, skymap)
    Governor,
    /// Values come from catalog records
    Recorded,
    /// Spatial index over an equal-angle grid at `level`
    Skypix {
        /// Grid level
        level: u8,
    },
}

/// Membership in a spatial family
///
/// Within one family the element with the highest rank carries the most
/// specific region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpatialFamily {
    pub family: String,
    pub rank: u8,
}

/// Definition of one dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionDef {
    pub name: String,
    /// Dimensions whose keys identify a record of this one
    pub requires: Vec<String>,
    /// Dimensions whose values a record of this one determines
    pub implies: Vec<String>,
    pub kind: DimensionKind,
    pub spatial: Option<SpatialFamily>,
}

impl DimensionDef {
    /// Governor dimension with no dependencies
    #[must_use]
    pub fn governor(name: &str) -> Self {
        Self::with_kind(name, DimensionKind::Governor)
    }

    /// Record-backed dimension
    #[must_use]
    pub fn recorded(name: &str) -> Self {
        Self::with_kind(name, DimensionKind::Recorded)
    }

    /// Skypix dimension over an equal-angle grid; its family is `grid`
    #[must_use]
    pub fn skypix(name: &str, level: u8) -> Self {
        Self::with_kind(name, DimensionKind::Skypix { level }).spatial("grid", level)
    }

    fn with_kind(name: &str, kind: DimensionKind) -> Self {
        Self {
            name: name.to_string(),
            requires: Vec::new(),
            implies: Vec::new(),
            kind,
            spatial: None,
        }
    }

    /// Add required dimensions
    #[must_use]
    pub fn requires<const N: usize>(mut self, names: [&str; N]) -> Self {
        self.requires.extend(names.iter().map(ToString::to_string));
        self
    }

    /// Add implied dimensions
    #[must_use]
    pub fn implies<const N: usize>(mut self, names: [&str; N]) -> Self {
        self.implies.extend(names.iter().map(ToString::to_string));
        self
    }

    /// Place in a spatial family
    #[must_use]
    pub fn spatial(mut self, family: &str, rank: u8) -> Self {
        self.spatial = Some(SpatialFamily {
            family: family.to_string(),
            rank,
        });
        self
    }

    /// Whether this is a skypix dimension
    #[inline]
    #[must_use]
    pub fn is_skypix(&self) -> bool {
        matches!(self.kind, DimensionKind::Skypix { .. })
    }

    fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.requires.iter().chain(self.implies.iter())
    }
}

/// A record-backed relationship between dimensions with no key of its own
/// (e.g. the region of one detector in one visit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinElementDef {
    pub name: String,
    pub requires: Vec<String>,
    pub spatial: Option<SpatialFamily>,
}

impl JoinElementDef {
    #[must_use]
    pub fn new<const N: usize>(name: &str, requires: [&str; N]) -> Self {
        Self {
            name: name.to_string(),
            requires: requires.iter().map(ToString::to_string).collect(),
            spatial: None,
        }
    }

    #[must_use]
    pub fn spatial(mut self, family: &str, rank: u8) -> Self {
        self.spatial = Some(SpatialFamily {
            family: family.to_string(),
            rank,
        });
        self
    }
}

/// The fixed dimension graph
#[derive(Debug, Clone)]
pub struct DimensionUniverse {
    dimensions: IndexMap<String, DimensionDef>,
    joins: IndexMap<String, JoinElementDef>,
}

impl DimensionUniverse {
    /// Build a universe, checking names are unique and dependencies are
    /// defined before their dependents
    pub fn new(
        dimensions: Vec<DimensionDef>,
        joins: Vec<JoinElementDef>,
    ) -> Result<Self, DimensionError> {
        let mut seen = BTreeSet::new();
        for def in &dimensions {
            for dependency in def.dependencies() {
                if !seen.contains(dependency.as_str()) {
                    return Err(DimensionError::DependencyOrder {
                        dimension: def.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            if !seen.insert(def.name.as_str()) {
                return Err(DimensionError::DuplicateDimension(def.name.clone()));
            }
        }
        for join in &joins {
            if seen.contains(join.name.as_str()) {
                return Err(DimensionError::DuplicateDimension(join.name.clone()));
            }
            if let Some(missing) = join.requires.iter().find(|r| !seen.contains(r.as_str())) {
                return Err(DimensionError::DependencyOrder {
                    dimension: join.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(Self::from_parts(dimensions, joins))
    }

    fn from_parts(dimensions: Vec<DimensionDef>, joins: Vec<JoinElementDef>) -> Self {
        Self {
            dimensions: dimensions.into_iter().map(|d| (d.name.clone(), d)).collect(),
            joins: joins.into_iter().map(|j| (j.name.clone(), j)).collect(),
        }
    }

    /// The universe used by the test repositories
    #[must_use]
    pub fn standard() -> Self {
        let (dimensions, joins) = Self::standard_definitions();
        Self::from_parts(dimensions, joins)
    }

    fn standard_definitions() -> (Vec<DimensionDef>, Vec<JoinElementDef>) {
        let dimensions = vec![
            DimensionDef::governor("instrument"),
            DimensionDef::recorded("band"),
            DimensionDef::recorded("physical_filter")
                .requires(["instrument"])
                .implies(["band"]),
            DimensionDef::recorded("detector").requires(["instrument"]),
            DimensionDef::recorded("day_obs").requires(["instrument"]),
            DimensionDef::recorded("exposure")
                .requires(["instrument"])
                .implies(["physical_filter"]),
            DimensionDef::recorded("visit")
                .requires(["instrument"])
                .implies(["physical_filter"])
                .spatial("observation", 1),
            DimensionDef::governor("skymap"),
            DimensionDef::recorded("tract")
                .requires(["skymap"])
                .spatial("skymap", 1),
            DimensionDef::recorded("patch")
                .requires(["tract"])
                .spatial("skymap", 2),
            DimensionDef::skypix("grid5", 5),
            DimensionDef::skypix("grid7", 7),
        ];
        let joins = vec![JoinElementDef::new("visit_detector_region", ["visit", "detector"])
            .spatial("observation", 2)];
        (dimensions, joins)
    }

    /// Definition of a dimension
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DimensionDef> {
        self.dimensions.get(name)
    }

    /// Definition of a join element
    #[inline]
    #[must_use]
    pub fn join(&self, name: &str) -> Option<&JoinElementDef> {
        self.joins.get(name)
    }

    /// Dimension definitions in dependency order
    pub fn dimensions(&self) -> impl Iterator<Item = &DimensionDef> {
        self.dimensions.values()
    }

    /// Close a list of names over required and implied dimensions
    pub fn extract<I, S>(&self, names: I) -> Result<DimensionSet, DimensionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut closed = BTreeSet::new();
        let mut pending: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        while let Some(name) = pending.pop() {
            let def = self
                .get(&name)
                .ok_or_else(|| DimensionError::UnknownDimension(name.clone()))?;
            if closed.insert(name.clone()) {
                pending.extend(def.dependencies().cloned());
            }
        }
        Ok(DimensionSet::from_names(closed))
    }

    /// Whether a set is closed over its dependencies
    #[must_use]
    pub fn is_closed(&self, dimensions: &DimensionSet) -> bool {
        self.extract(dimensions.names())
            .is_ok_and(|closed| &closed == dimensions)
    }

    /// Keys that identify one record of `element` (a dimension or a join):
    /// everything it transitively requires, plus itself for dimensions
    pub fn record_keys(&self, element: &str) -> Result<DimensionSet, DimensionError> {
        let (mut pending, own): (Vec<String>, Option<&str>) = if let Some(def) = self.get(element) {
            (def.requires.clone(), Some(def.name.as_str()))
        } else if let Some(join) = self.join(element) {
            (join.requires.clone(), None)
        } else {
            return Err(DimensionError::UnknownDimension(element.to_string()));
        };

        let mut keys: BTreeSet<String> = own.map(str::to_string).into_iter().collect();
        while let Some(name) = pending.pop() {
            let def = self
                .get(&name)
                .ok_or_else(|| DimensionError::UnknownDimension(name.clone()))?;
            if keys.insert(name) {
                pending.extend(def.requires.iter().cloned());
            }
        }
        Ok(DimensionSet::from_names(keys))
    }

    /// Members of `dimensions` in dependency order
    #[must_use]
    pub fn sorted(&self, dimensions: &DimensionSet) -> Vec<&DimensionDef> {
        self.dimensions
            .values()
            .filter(|def| dimensions.contains(&def.name))
            .collect()
    }

    /// Join elements whose required dimensions are all in `dimensions`
    pub fn joins_within<'a>(
        &'a self,
        dimensions: &'a DimensionSet,
    ) -> impl Iterator<Item = &'a JoinElementDef> + 'a {
        self.joins
            .values()
            .filter(move |join| join.requires.iter().all(|r| dimensions.contains(r)))
    }

    /// Spatial family of a dimension or join element
    #[must_use]
    pub fn spatial_family(&self, element: &str) -> Option<&SpatialFamily> {
        self.get(element)
            .and_then(|def| def.spatial.as_ref())
            .or_else(|| self.join(element).and_then(|join| join.spatial.as_ref()))
    }

    /// Whether `name` is a skypix dimension
    #[inline]
    #[must_use]
    pub fn is_skypix(&self, name: &str) -> bool {
        self.get(name).is_some_and(DimensionDef::is_skypix)
    }

    /// Whether any member of `dimensions` (or a join within it) belongs to
    /// a spatial family, so its coordinates carry a region
    #[must_use]
    pub fn is_spatial(&self, dimensions: &DimensionSet) -> bool {
        self.sorted(dimensions).iter().any(|def| def.spatial.is_some())
            || self.joins_within(dimensions).any(|join| join.spatial.is_some())
    }

    /// The grid behind a skypix dimension
    #[must_use]
    pub fn pixelization(&self, name: &str) -> Option<EqualAngleGrid> {
        match self.get(name)?.kind {
            DimensionKind::Skypix { level } => Some(EqualAngleGrid::new(level)),
            _ => None,
        }
    }
}

impl Default for DimensionUniverse {
    fn default() -> Self {
        Self::standard()
    }
}
