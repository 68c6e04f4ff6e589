//! Build graph execution
//!
//! The runner walks targets in dependency order and runs each target's
//! steps through three collaborators: a plan builder, an executor with
//! direct and detached strategies, and a repository tool for snapshots and
//! collection setup.
//!
//! # Failure handling
//!
//! A non-zero exit from a step flagged `expect_failure` is recorded and the
//! target carries on. Any other failure stops the target, and every target
//! downstream of it is halted. Independent branches still run.

use crate::error::BuildError;
use crate::graph::{BuildGraph, BuildStep, BuildTarget, TargetId};
use crate::plan::{ExecOptions, PlanRequest, QuantumPlan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Exit status reported by an execution collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub const SUCCESS: Self = Self(0);
    pub const FAILURE: Self = Self(1);

    #[inline]
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        Self(code)
    }

    #[inline]
    #[must_use]
    pub fn code(self) -> i32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn success(self) -> bool {
        self.0 == 0
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "exit status {}", self.0)
    }
}

/// Derives a stage's plan from a pipeline definition and a repository
#[async_trait::async_trait]
pub trait PlanBuilder: Send + Sync {
    async fn build_plan(&self, repo: &Path, request: &PlanRequest) -> Result<QuantumPlan, BuildError>;
}

/// Runs a plan against a repository
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Execute directly against the repository's catalog
    async fn execute_direct(
        &self,
        repo: &Path,
        plan: &QuantumPlan,
        options: &ExecOptions,
    ) -> Result<ExitStatus, BuildError>;

    /// Prepare detached execution
    async fn detached_init(&self, repo: &Path, plan: &QuantumPlan) -> Result<ExitStatus, BuildError>;

    /// Execute without touching the catalog
    async fn detached_run(
        &self,
        repo: &Path,
        plan: &QuantumPlan,
        options: &ExecOptions,
    ) -> Result<ExitStatus, BuildError>;

    /// Merge detached results into the catalog
    async fn transfer_back(&self, repo: &Path, plan: &QuantumPlan) -> Result<ExitStatus, BuildError>;
}

/// Repository-level operations used to set up and move snapshots
#[async_trait::async_trait]
pub trait RepoTool: Send + Sync {
    async fn bootstrap(&self, repo: &Path, clobber: bool) -> Result<(), BuildError>;

    async fn extract(&self, archive: &Path, repo: &Path) -> Result<(), BuildError>;

    async fn archive(&self, repo: &Path, archive: &Path) -> Result<(), BuildError>;

    /// Mock the pipeline's missing inputs into `run`, returning the number
    /// of datasets written
    async fn prep(&self, repo: &Path, pipeline: &Path, run: &str) -> Result<usize, BuildError>;

    /// Define `chain` as the flattened members of `source`
    async fn flatten_chain(&self, repo: &Path, chain: &str, source: &str) -> Result<(), BuildError>;
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Succeeded,
    /// Non-zero exit on a step that was expected to fail
    ExpectedFailure(ExitStatus),
    Failed(String),
}

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetOutcome {
    Succeeded,
    /// Completed, with at least one expected step failure
    ExpectedFailure,
    Failed(String),
    /// Not run because an upstream target failed
    Halted { cause: TargetId },
}

impl TargetOutcome {
    /// Whether the target's outputs exist for downstream targets
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Succeeded | Self::ExpectedFailure)
    }
}

/// Per-target record of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub output: PathBuf,
    pub outcome: TargetOutcome,
    pub steps: Vec<(String, StepOutcome)>,
}

/// Outcome of every target in a graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub targets: BTreeMap<TargetId, TargetReport>,
}

impl BuildReport {
    #[must_use]
    pub fn outcome(&self, id: TargetId) -> Option<&TargetOutcome> {
        self.targets.get(&id).map(|r| &r.outcome)
    }

    /// Outcome of the target producing `output`
    #[must_use]
    pub fn outcome_of(&self, output: &Path) -> Option<&TargetOutcome> {
        self.targets.values().find(|r| r.output == output).map(|r| &r.outcome)
    }

    /// True when no target failed or was halted
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.targets.values().all(|r| r.outcome.is_complete())
    }

    #[must_use]
    pub fn failed(&self) -> Vec<TargetId> {
        self.filter(|o| matches!(o, TargetOutcome::Failed(_)))
    }

    #[must_use]
    pub fn halted(&self) -> Vec<TargetId> {
        self.filter(|o| matches!(o, TargetOutcome::Halted { .. }))
    }

    #[must_use]
    pub fn expected_failures(&self) -> Vec<TargetId> {
        self.filter(|o| matches!(o, TargetOutcome::ExpectedFailure))
    }

    fn filter(&self, predicate: impl Fn(&TargetOutcome) -> bool) -> Vec<TargetId> {
        self.targets
            .iter()
            .filter(|(_, r)| predicate(&r.outcome))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Runs build graphs in a work directory
pub struct BuildRunner {
    work_dir: PathBuf,
    planner: Arc<dyn PlanBuilder>,
    executor: Arc<dyn Executor>,
    repo_tool: Arc<dyn RepoTool>,
}

impl BuildRunner {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        planner: Arc<dyn PlanBuilder>,
        executor: Arc<dyn Executor>,
        repo_tool: Arc<dyn RepoTool>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            planner,
            executor,
            repo_tool,
        }
    }

    #[inline]
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Absolute location of a target path
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Run every target in dependency order
    pub async fn run(&self, graph: &BuildGraph) -> Result<BuildReport, BuildError> {
        let order = graph.topological_order()?;
        info!(targets = order.len(), work_dir = %self.work_dir.display(), "running build graph");

        let mut report = BuildReport::default();
        for id in order {
            let Some(target) = graph.target(id) else {
                continue;
            };
            let blocked = graph.dependencies(id).into_iter().find_map(|dependency| {
                match report.outcome(dependency) {
                    Some(TargetOutcome::Halted { cause }) => Some(*cause),
                    Some(TargetOutcome::Failed(_)) => Some(dependency),
                    _ => None,
                }
            });
            let record = match blocked {
                Some(cause) => {
                    error!(target = %target.output.display(), %cause, "halted by upstream failure");
                    TargetReport {
                        output: target.output.clone(),
                        outcome: TargetOutcome::Halted { cause },
                        steps: Vec::new(),
                    }
                }
                None => self.run_target(target).await,
            };
            report.targets.insert(id, record);
        }
        Ok(report)
    }

    /// Run one target's steps, stopping at the first unexpected failure
    pub async fn run_target(&self, target: &BuildTarget) -> TargetReport {
        let mut steps = Vec::with_capacity(target.steps.len());
        let mut expected = false;
        let mut failure = None;

        if let Err(err) = self.prepare_outputs(target).await {
            failure = Some(err.to_string());
        }
        for step in &target.steps {
            if failure.is_some() {
                break;
            }
            let outcome = match self.run_step(step).await {
                Ok(status) if status.success() => StepOutcome::Succeeded,
                Ok(status) if step.expects_failure() => {
                    warn!(target = %target.output.display(), step = step.name(), %status, "step failed as expected");
                    expected = true;
                    StepOutcome::ExpectedFailure(status)
                }
                Ok(status) => StepOutcome::Failed(format!("{} failed with {status}", step.name())),
                Err(err) => StepOutcome::Failed(format!("{} failed: {err}", step.name())),
            };
            if let StepOutcome::Failed(message) = &outcome {
                error!(target = %target.output.display(), step = step.name(), %message, "step failed");
                failure = Some(message.clone());
            }
            if let Err(err) = self.log_step(target, step, &outcome).await {
                warn!(target = %target.output.display(), error = %err, "could not write step log");
            }
            steps.push((step.name().to_string(), outcome));
        }

        let outcome = match failure {
            Some(message) => TargetOutcome::Failed(message),
            None if expected => TargetOutcome::ExpectedFailure,
            None => TargetOutcome::Succeeded,
        };
        debug!(target = %target.output.display(), ?outcome, "target finished");
        TargetReport {
            output: target.output.clone(),
            outcome,
            steps,
        }
    }

    async fn prepare_outputs(&self, target: &BuildTarget) -> Result<(), BuildError> {
        for output in target.outputs() {
            if let Some(parent) = self.resolve(output).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BuildError::io(parent, e))?;
            }
        }
        if let Some(log) = &target.log {
            let log = self.resolve(log);
            match tokio::fs::remove_file(&log).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(BuildError::io(log, e)),
                _ => {}
            }
        }
        Ok(())
    }

    async fn run_step(&self, step: &BuildStep) -> Result<ExitStatus, BuildError> {
        match step {
            BuildStep::Bootstrap { repo, clobber } => {
                self.repo_tool.bootstrap(&self.resolve(repo), *clobber).await?;
            }
            BuildStep::Extract { archive, repo } => {
                self.repo_tool
                    .extract(&self.resolve(archive), &self.resolve(repo))
                    .await?;
            }
            BuildStep::Prep { repo, pipeline, run } => {
                let written = self
                    .repo_tool
                    .prep(&self.resolve(repo), &self.resolve(pipeline), run)
                    .await?;
                debug!(repo = %repo.display(), run, written, "prepared pipeline inputs");
            }
            BuildStep::FlattenChain { repo, chain, source } => {
                self.repo_tool
                    .flatten_chain(&self.resolve(repo), chain, source)
                    .await?;
            }
            BuildStep::BuildPlan { repo, request, plan } => {
                let request = PlanRequest {
                    pipeline: self.resolve(&request.pipeline),
                    ..request.clone()
                };
                let built = self.planner.build_plan(&self.resolve(repo), &request).await?;
                info!(plan = %plan.display(), quanta = built.len(), output_run = %built.output_run, "built plan");
                built.write(&self.resolve(plan))?;
            }
            BuildStep::ExecuteDirect { repo, plan, options, .. } => {
                let plan = QuantumPlan::read(&self.resolve(plan))?;
                return self
                    .executor
                    .execute_direct(&self.resolve(repo), &plan, options)
                    .await;
            }
            BuildStep::DetachedInit { repo, plan } => {
                let plan = QuantumPlan::read(&self.resolve(plan))?;
                return self.executor.detached_init(&self.resolve(repo), &plan).await;
            }
            BuildStep::DetachedRun { repo, plan, options, .. } => {
                let plan = QuantumPlan::read(&self.resolve(plan))?;
                return self
                    .executor
                    .detached_run(&self.resolve(repo), &plan, options)
                    .await;
            }
            BuildStep::TransferBack { repo, plan } => {
                let plan = QuantumPlan::read(&self.resolve(plan))?;
                return self.executor.transfer_back(&self.resolve(repo), &plan).await;
            }
            BuildStep::Archive { repo, archive } => {
                self.repo_tool
                    .archive(&self.resolve(repo), &self.resolve(archive))
                    .await?;
            }
            BuildStep::Remove { path } => {
                let path = self.resolve(path);
                match tokio::fs::remove_dir_all(&path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(BuildError::io(path, e)),
                    _ => {}
                }
            }
            BuildStep::Link { source, link } => {
                self.link(&self.resolve(source), &self.resolve(link)).await?;
            }
        }
        Ok(ExitStatus::SUCCESS)
    }

    async fn link(&self, source: &Path, link: &Path) -> Result<(), BuildError> {
        match tokio::fs::remove_file(link).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(BuildError::io(link, e)),
            _ => {}
        }
        #[cfg(unix)]
        tokio::fs::symlink(source, link)
            .await
            .map_err(|e| BuildError::io(link, e))?;
        #[cfg(not(unix))]
        tokio::fs::copy(source, link)
            .await
            .map_err(|e| BuildError::io(link, e))?;
        Ok(())
    }

    async fn log_step(&self, target: &BuildTarget, step: &BuildStep, outcome: &StepOutcome) -> Result<(), BuildError> {
        let Some(log) = &target.log else {
            return Ok(());
        };
        let path = self.resolve(log);
        let status = match outcome {
            StepOutcome::Succeeded => "ok".to_string(),
            StepOutcome::ExpectedFailure(status) => format!("expected failure ({status})"),
            StepOutcome::Failed(message) => format!("FAILED: {message}"),
        };
        let line = format!(
            "{} {} {}\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            step.name(),
            status
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| BuildError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| BuildError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TargetKind;
    use parking_lot::Mutex;

    /// Records calls; fails detached runs with the configured status
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        detached_status: Option<ExitStatus>,
        fail_extract: bool,
    }

    impl Recording {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    #[async_trait::async_trait]
    impl PlanBuilder for Recording {
        async fn build_plan(&self, _repo: &Path, request: &PlanRequest) -> Result<QuantumPlan, BuildError> {
            self.record("plan");
            Ok(QuantumPlan::for_request(request))
        }
    }

    #[async_trait::async_trait]
    impl Executor for Recording {
        async fn execute_direct(&self, _: &Path, _: &QuantumPlan, _: &ExecOptions) -> Result<ExitStatus, BuildError> {
            self.record("direct");
            Ok(ExitStatus::SUCCESS)
        }

        async fn detached_init(&self, _: &Path, _: &QuantumPlan) -> Result<ExitStatus, BuildError> {
            self.record("init");
            Ok(ExitStatus::SUCCESS)
        }

        async fn detached_run(&self, _: &Path, _: &QuantumPlan, _: &ExecOptions) -> Result<ExitStatus, BuildError> {
            self.record("detached");
            Ok(self.detached_status.unwrap_or(ExitStatus::SUCCESS))
        }

        async fn transfer_back(&self, _: &Path, _: &QuantumPlan) -> Result<ExitStatus, BuildError> {
            self.record("transfer");
            Ok(ExitStatus::SUCCESS)
        }
    }

    #[async_trait::async_trait]
    impl RepoTool for Recording {
        async fn bootstrap(&self, _: &Path, _: bool) -> Result<(), BuildError> {
            self.record("bootstrap");
            Ok(())
        }

        async fn extract(&self, _: &Path, _: &Path) -> Result<(), BuildError> {
            self.record("extract");
            if self.fail_extract {
                return Err(BuildError::collaborator("extract", "corrupt archive"));
            }
            Ok(())
        }

        async fn archive(&self, _: &Path, archive: &Path) -> Result<(), BuildError> {
            self.record("archive");
            tokio::fs::write(archive, b"").await.map_err(|e| BuildError::io(archive, e))
        }

        async fn prep(&self, _: &Path, _: &Path, _: &str) -> Result<usize, BuildError> {
            self.record("prep");
            Ok(0)
        }

        async fn flatten_chain(&self, _: &Path, _: &str, _: &str) -> Result<(), BuildError> {
            self.record("chain");
            Ok(())
        }
    }

    fn runner(dir: &Path, collaborator: Arc<Recording>) -> BuildRunner {
        BuildRunner::new(dir, collaborator.clone(), collaborator.clone(), collaborator)
    }

    fn detached(output: &str, source: &str, expect_failure: bool) -> BuildTarget {
        BuildTarget::new(TargetKind::Detached, output)
            .with_log(format!("{output}.log"))
            .with_source(source)
            .with_step(BuildStep::Extract {
                archive: source.into(),
                repo: "repo".into(),
            })
            .with_step(BuildStep::DetachedRun {
                repo: "repo".into(),
                plan: "plan.json".into(),
                options: ExecOptions::default(),
                expect_failure,
            })
            .with_step(BuildStep::Archive {
                repo: "repo".into(),
                archive: output.into(),
            })
    }

    async fn write_plan(dir: &Path) {
        let plan = QuantumPlan {
            input: "HSC/defaults".into(),
            output: "HSC/runs/ci".into(),
            output_run: "HSC/runs/ci/full".into(),
            extend_run: false,
            clobber_outputs: false,
            failures: Vec::new(),
            quanta: Vec::new(),
        };
        plan.write(&dir.join("plan.json")).unwrap();
    }

    #[tokio::test]
    async fn expected_failure_does_not_halt() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(dir.path()).await;
        let collaborator = Arc::new(Recording {
            detached_status: Some(ExitStatus::FAILURE),
            ..Recording::default()
        });
        let graph = BuildGraph::from_targets([
            detached("a.tgz", "seed.tgz", true),
            detached("b.tgz", "a.tgz", true),
        ])
        .unwrap();

        let report = runner(dir.path(), collaborator.clone()).run(&graph).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.expected_failures().len(), 2);
        assert_eq!(collaborator.calls.lock().iter().filter(|c| *c == "archive").count(), 2);

        let log = std::fs::read_to_string(dir.path().join("a.tgz.log")).unwrap();
        assert_eq!(log.lines().count(), 3);
        assert!(log.lines().nth(1).unwrap().contains("run-qbb expected failure"));
    }

    #[tokio::test]
    async fn unexpected_failure_halts_descendants_only() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(dir.path()).await;
        let collaborator = Arc::new(Recording {
            detached_status: Some(ExitStatus::from_code(2)),
            ..Recording::default()
        });
        let seed = BuildTarget::new(TargetKind::BaseRepo, "seed.tgz").with_step(BuildStep::Archive {
            repo: "seed".into(),
            archive: "seed.tgz".into(),
        });
        let graph = BuildGraph::from_targets([
            seed,
            detached("a.tgz", "seed.tgz", false),
            detached("b.tgz", "a.tgz", false),
            detached("c.tgz", "b.tgz", false),
            BuildTarget::new(TargetKind::Link, "other.tgz")
                .with_source("seed.tgz")
                .with_step(BuildStep::Link {
                    source: "seed.tgz".into(),
                    link: "other.tgz".into(),
                }),
        ])
        .unwrap();

        let report = runner(dir.path(), collaborator.clone()).run(&graph).await.unwrap();
        let a = graph.producer_of(Path::new("a.tgz")).unwrap();
        assert_eq!(report.failed(), vec![a]);
        assert_eq!(report.halted().len(), 2);
        assert_eq!(
            report.outcome_of(Path::new("c.tgz")),
            Some(&TargetOutcome::Halted { cause: a })
        );
        assert_eq!(report.outcome_of(Path::new("other.tgz")), Some(&TargetOutcome::Succeeded));
        assert!(dir.path().join("other.tgz").exists());
        // the failed target stopped before archiving
        assert_eq!(collaborator.calls.lock().iter().filter(|c| *c == "archive").count(), 1);
    }

    #[tokio::test]
    async fn collaborator_errors_fail_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let collaborator = Arc::new(Recording {
            fail_extract: true,
            ..Recording::default()
        });
        let report = runner(dir.path(), collaborator)
            .run_target(&detached("a.tgz", "seed.tgz", true))
            .await;
        assert!(matches!(&report.outcome, TargetOutcome::Failed(message) if message.contains("corrupt archive")));
        assert_eq!(report.steps.len(), 1);
    }
}
