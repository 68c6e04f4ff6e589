//! Build targets and the dependency graph between them
//!
//! A target owns an ordered list of steps and declares the files it reads
//! and produces. Edges run from the producer of a file to every target that
//! reads it, so a target can start once all its producers have finished.

use crate::error::BuildError;
use crate::plan::{ExecOptions, PlanRequest};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

/// Index of a target within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(usize);

impl TargetId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for TargetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a target produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    BaseRepo,
    Inputs,
    Plan,
    Direct,
    Detached,
    Link,
}

/// One action within a target; paths are relative to the work directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BuildStep {
    Bootstrap {
        repo: PathBuf,
        clobber: bool,
    },
    Extract {
        archive: PathBuf,
        repo: PathBuf,
    },
    Prep {
        repo: PathBuf,
        pipeline: PathBuf,
        run: String,
    },
    /// Define `chain` as the flattened contents of `source`
    FlattenChain {
        repo: PathBuf,
        chain: String,
        source: String,
    },
    BuildPlan {
        repo: PathBuf,
        request: PlanRequest,
        plan: PathBuf,
    },
    ExecuteDirect {
        repo: PathBuf,
        plan: PathBuf,
        options: ExecOptions,
        expect_failure: bool,
    },
    DetachedInit {
        repo: PathBuf,
        plan: PathBuf,
    },
    DetachedRun {
        repo: PathBuf,
        plan: PathBuf,
        options: ExecOptions,
        expect_failure: bool,
    },
    TransferBack {
        repo: PathBuf,
        plan: PathBuf,
    },
    Archive {
        repo: PathBuf,
        archive: PathBuf,
    },
    Remove {
        path: PathBuf,
    },
    Link {
        source: PathBuf,
        link: PathBuf,
    },
}

impl BuildStep {
    /// Short name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bootstrap { .. } => "make-base-repo",
            Self::Extract { .. } => "extract",
            Self::Prep { .. } => "prep-for-pipeline",
            Self::FlattenChain { .. } => "collection-chain",
            Self::BuildPlan { .. } => "qgraph",
            Self::ExecuteDirect { .. } => "run",
            Self::DetachedInit { .. } => "pre-exec-init-qbb",
            Self::DetachedRun { .. } => "run-qbb",
            Self::TransferBack { .. } => "transfer-from-graph",
            Self::Archive { .. } => "archive",
            Self::Remove { .. } => "remove",
            Self::Link { .. } => "link",
        }
    }

    /// Whether a non-zero exit from this step is tolerated
    #[must_use]
    pub fn expects_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecuteDirect { expect_failure: true, .. } | Self::DetachedRun { expect_failure: true, .. }
        )
    }
}

/// A unit of the build: declared inputs, declared outputs and the steps
/// that turn one into the other
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub kind: TargetKind,
    pub output: PathBuf,
    #[serde(default)]
    pub log: Option<PathBuf>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    pub steps: Vec<BuildStep>,
}

impl BuildTarget {
    pub fn new(kind: TargetKind, output: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            output: output.into(),
            log: None,
            sources: Vec::new(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: impl Into<PathBuf>) -> Self {
        self.log = Some(log.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.sources.push(source.into());
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: BuildStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Files this target produces
    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.output.as_path()).chain(self.log.as_deref())
    }

    #[must_use]
    pub fn expects_failure(&self) -> bool {
        self.steps.iter().any(BuildStep::expects_failure)
    }
}

/// Target that bootstraps a fresh base repository and archives it
pub fn base_repo_target(archive: impl Into<PathBuf>) -> BuildTarget {
    let archive = archive.into();
    let repo = archive.with_extension("").with_extension("");
    BuildTarget::new(TargetKind::BaseRepo, archive.clone())
        .with_step(BuildStep::Bootstrap {
            repo: repo.clone(),
            clobber: true,
        })
        .with_step(BuildStep::Archive { repo, archive })
}

/// Directed acyclic graph of build targets
#[derive(Debug, Default)]
pub struct BuildGraph {
    targets: Vec<BuildTarget>,
    dag: DiGraphMap<TargetId, ()>,
    producers: HashMap<PathBuf, TargetId>,
}

impl BuildGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph holding every target in `targets`
    pub fn from_targets(targets: impl IntoIterator<Item = BuildTarget>) -> Result<Self, BuildError> {
        let mut graph = Self::new();
        graph.extend(targets)?;
        Ok(graph)
    }

    pub fn extend(&mut self, targets: impl IntoIterator<Item = BuildTarget>) -> Result<Vec<TargetId>, BuildError> {
        targets.into_iter().map(|target| self.add(target)).collect()
    }

    /// Add a target, wiring it to the producers of its sources and to any
    /// existing consumers of its outputs
    pub fn add(&mut self, target: BuildTarget) -> Result<TargetId, BuildError> {
        if let Some(duplicate) = target.outputs().find(|o| self.producers.contains_key(*o)) {
            return Err(BuildError::DuplicateOutput(duplicate.to_path_buf()));
        }
        let id = TargetId(self.targets.len());
        self.dag.add_node(id);

        let mut edges = Vec::new();
        for source in &target.sources {
            if let Some(&producer) = self.producers.get(source) {
                edges.push((producer, id));
            }
        }
        for (index, existing) in self.targets.iter().enumerate() {
            if existing.sources.iter().any(|s| target.outputs().any(|o| o == s.as_path())) {
                edges.push((id, TargetId(index)));
            }
        }
        for &(from, to) in &edges {
            self.dag.add_edge(from, to, ());
        }
        if petgraph::algo::is_cyclic_directed(&self.dag) {
            self.dag.remove_node(id);
            return Err(BuildError::CycleDetected(target.output.display().to_string()));
        }

        for output in target.outputs() {
            self.producers.insert(output.to_path_buf(), id);
        }
        self.targets.push(target);
        Ok(id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn target(&self, id: TargetId) -> Option<&BuildTarget> {
        self.targets.get(id.0)
    }

    pub fn targets(&self) -> impl Iterator<Item = (TargetId, &BuildTarget)> {
        self.targets.iter().enumerate().map(|(i, t)| (TargetId(i), t))
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Target producing `path`, if any
    #[must_use]
    pub fn producer_of(&self, path: &Path) -> Option<TargetId> {
        self.producers.get(path).copied()
    }

    /// Targets whose outputs this one reads
    #[must_use]
    pub fn dependencies(&self, id: TargetId) -> Vec<TargetId> {
        let mut ids: Vec<_> = self.dag.neighbors_directed(id, Direction::Incoming).collect();
        ids.sort_unstable();
        ids
    }

    /// Targets that read this one's outputs
    #[must_use]
    pub fn dependents(&self, id: TargetId) -> Vec<TargetId> {
        let mut ids: Vec<_> = self.dag.neighbors_directed(id, Direction::Outgoing).collect();
        ids.sort_unstable();
        ids
    }

    /// Every target reachable from `id`, excluding `id`
    #[must_use]
    pub fn descendants(&self, id: TargetId) -> BTreeSet<TargetId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<TargetId> = self.dependents(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Targets with no dependencies
    #[must_use]
    pub fn roots(&self) -> Vec<TargetId> {
        self.targets()
            .map(|(id, _)| id)
            .filter(|id| self.dag.neighbors_directed(*id, Direction::Incoming).next().is_none())
            .collect()
    }

    /// Targets in an order where every target follows its dependencies;
    /// ties keep insertion order
    pub fn topological_order(&self) -> Result<Vec<TargetId>, BuildError> {
        toposort(&self.dag, None).map_err(|cycle| BuildError::CycleDetected(cycle.node_id().to_string()))?;

        let mut pending: HashMap<TargetId, usize> = self
            .targets()
            .map(|(id, _)| (id, self.dependencies(id).len()))
            .collect();
        let mut ready: BTreeSet<TargetId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.targets.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for dependent in self.dependents(next) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(kind: TargetKind, output: &str, sources: &[&str]) -> BuildTarget {
        sources
            .iter()
            .fold(BuildTarget::new(kind, output), |t, s| t.with_source(*s))
    }

    #[test]
    fn edges_follow_files() {
        let mut graph = BuildGraph::new();
        let base = graph.add(target(TargetKind::BaseRepo, "base.tgz", &[])).unwrap();
        let inputs = graph.add(target(TargetKind::Inputs, "ci/inputs.tgz", &["base.tgz"])).unwrap();
        let plan = graph
            .add(target(TargetKind::Plan, "ci/full.qgraph.json", &["ci/inputs.tgz", "pipeline.yaml"]))
            .unwrap();
        let direct = graph
            .add(target(TargetKind::Direct, "ci/full-direct.tgz", &["ci/inputs.tgz", "ci/full.qgraph.json"]))
            .unwrap();

        assert_eq!(graph.roots(), vec![base]);
        assert_eq!(graph.dependencies(direct), vec![inputs, plan]);
        assert_eq!(graph.descendants(inputs), [plan, direct].into_iter().collect());
        assert_eq!(graph.topological_order().unwrap(), vec![base, inputs, plan, direct]);
    }

    #[test]
    fn late_producers_are_wired() {
        let mut graph = BuildGraph::new();
        let consumer = graph.add(target(TargetKind::Link, "ci/direct.tgz", &["ci/full-direct.tgz"])).unwrap();
        let producer = graph.add(target(TargetKind::Direct, "ci/full-direct.tgz", &[])).unwrap();
        assert_eq!(graph.dependencies(consumer), vec![producer]);
        assert_eq!(graph.topological_order().unwrap(), vec![producer, consumer]);
    }

    #[test]
    fn cycles_and_duplicates_rejected() {
        let mut graph = BuildGraph::new();
        graph.add(target(TargetKind::Plan, "a", &["b"])).unwrap();
        let err = graph.add(target(TargetKind::Plan, "b", &["a"])).unwrap_err();
        assert!(matches!(err, BuildError::CycleDetected(_)));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.edge_count(), 0);

        let err = graph.add(target(TargetKind::Plan, "a", &[])).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateOutput(_)));
    }

    #[test]
    fn base_repo_target_archives_bootstrap() {
        let target = base_repo_target("base.tgz");
        assert_eq!(target.steps.len(), 2);
        assert!(matches!(&target.steps[0], BuildStep::Bootstrap { repo, .. } if repo == Path::new("base")));
        assert!(!target.expects_failure());
    }
}
