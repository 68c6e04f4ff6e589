//! Stage chaining for one pipeline
//!
//! [`PipelineCommands`] turns a sequence of stages into build targets. Each
//! stage derives a plan and executes it twice, once directly against the
//! repository and once detached with the results transferred back. Every
//! target of a stage starts from the previous stage's detached snapshot;
//! the direct snapshot of a stage is only ever compared, never chained.
//!
//! ```rust,ignore
//! let targets = PipelineCommands::new("ci", "pipelines/ci.yaml", "base.tgz", BuildConfig::default())
//!     .add(StageOptions::step("step1"))?
//!     .add(StageOptions::step("step2").with_failure("_mock_calibrate:error:detector = 42"))?
//!     .add_side_run(SideStageOptions::new("step2-retry").with_extend_run(true).with_clobber_outputs(true))?
//!     .finish();
//! ```

use crate::error::BuildError;
use crate::failure::{parse_memory, FailureDirective};
use crate::graph::{BuildStep, BuildTarget, TargetKind};
use crate::plan::{ExecOptions, PlanRequest};
use crate::predicate::DataPredicate;
use cim_mock::{MISC_INPUT_RUN, UNMOCKED_DATASET_TYPES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default name of the chained collection holding all pipeline inputs
pub const DEFAULTS_COLLECTION: &str = "HSC/defaults";

/// Collection naming and locations shared by every pipeline of a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Output chain; `{name}` is the pipeline name
    pub chain_template: String,
    /// Output runs; `{name}` and `{suffix}` are substituted
    pub run_template: String,
    pub defaults_collection: String,
    /// Run that receives pipeline-specific mock inputs
    pub misc_run: String,
    pub unmocked_dataset_types: Vec<String>,
    /// Directory all target paths are relative to
    pub work_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            chain_template: "HSC/runs/{name}".to_string(),
            run_template: "HSC/runs/{name}/{suffix}".to_string(),
            defaults_collection: DEFAULTS_COLLECTION.to_string(),
            misc_run: MISC_INPUT_RUN.to_string(),
            unmocked_dataset_types: UNMOCKED_DATASET_TYPES.iter().map(ToString::to_string).collect(),
            work_dir: PathBuf::from("."),
        }
    }
}

impl BuildConfig {
    #[must_use]
    pub fn with_chain_template(mut self, template: impl Into<String>) -> Self {
        self.chain_template = template.into();
        self
    }

    #[must_use]
    pub fn with_run_template(mut self, template: impl Into<String>) -> Self {
        self.run_template = template.into();
        self
    }

    #[must_use]
    pub fn with_defaults_collection(mut self, collection: impl Into<String>) -> Self {
        self.defaults_collection = collection.into();
        self
    }

    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    #[must_use]
    pub fn chain(&self, name: &str) -> String {
        self.chain_template.replace("{name}", name)
    }

    #[must_use]
    pub fn run(&self, name: &str, suffix: &str) -> String {
        self.run_template.replace("{name}", name).replace("{suffix}", suffix)
    }
}

/// Options for a main-lineage stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOptions {
    /// Named subset to run; the whole pipeline when absent
    pub step: Option<String>,
    /// Distinguishes several graphs for one step
    pub group: Option<String>,
    pub query: String,
    pub failures: Vec<String>,
    pub skip_existing_in_last: bool,
    /// Memory limits for a first attempt and its automatic retry
    pub auto_retry_mem: Option<(String, String)>,
}

impl StageOptions {
    pub fn step(step: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_where(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_failure(mut self, directive: impl Into<String>) -> Self {
        self.failures.push(directive.into());
        self
    }

    #[must_use]
    pub fn with_skip_existing_in_last(mut self, skip: bool) -> Self {
        self.skip_existing_in_last = skip;
        self
    }

    #[must_use]
    pub fn with_auto_retry_mem(mut self, first: impl Into<String>, retry: impl Into<String>) -> Self {
        self.auto_retry_mem = Some((first.into(), retry.into()));
        self
    }

    fn suffix(&self) -> String {
        let base = self.step.as_deref().unwrap_or("full");
        match &self.group {
            Some(group) => format!("{base}-{group}"),
            None => base.to_string(),
        }
    }
}

/// Options for a stage layered on the lineage without joining it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideStageOptions {
    pub suffix: String,
    /// Task labels or subsets; the whole pipeline when empty
    pub tasks_or_subsets: Vec<String>,
    pub query: String,
    pub failures: Vec<String>,
    pub skip_existing_in_last: bool,
    /// Write into the last stage's output run instead of a new one
    pub extend_run: bool,
    pub clobber_outputs: bool,
    pub raise_on_partial_outputs: bool,
    /// Overrides the default of expecting failure whenever failures are
    /// injected
    pub expect_failure: Option<bool>,
}

impl SideStageOptions {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks_or_subsets = tasks.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_where(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_failure(mut self, directive: impl Into<String>) -> Self {
        self.failures.push(directive.into());
        self
    }

    #[must_use]
    pub fn with_skip_existing_in_last(mut self, skip: bool) -> Self {
        self.skip_existing_in_last = skip;
        self
    }

    #[must_use]
    pub fn with_extend_run(mut self, extend_run: bool) -> Self {
        self.extend_run = extend_run;
        self
    }

    #[must_use]
    pub fn with_clobber_outputs(mut self, clobber_outputs: bool) -> Self {
        self.clobber_outputs = clobber_outputs;
        self
    }

    #[must_use]
    pub fn with_raise_on_partial_outputs(mut self, raise: bool) -> Self {
        self.raise_on_partial_outputs = raise;
        self
    }

    #[must_use]
    pub fn with_expect_failure(mut self, expect_failure: bool) -> Self {
        self.expect_failure = Some(expect_failure);
        self
    }
}

/// Plan-building inputs shared by both kinds of stage
struct PlanSpec<'a> {
    suffix: &'a str,
    output_run: &'a str,
    tasks: Vec<String>,
    query: &'a str,
    failures: &'a [String],
    skip_existing_in_last: bool,
    extend_run: bool,
    clobber_outputs: bool,
}

/// Execution inputs shared by both strategies
struct ExecSpec<'a> {
    suffix: &'a str,
    options: ExecOptions,
    expect_failure: bool,
    retry_memory: Option<u64>,
}

/// Build targets for one pipeline, chained stage by stage
#[derive(Debug)]
pub struct PipelineCommands {
    name: String,
    pipeline: PathBuf,
    chain: String,
    config: BuildConfig,
    targets: Vec<BuildTarget>,
    last_direct: PathBuf,
    last_qbb: PathBuf,
    last_output_run: Option<String>,
}

impl PipelineCommands {
    /// Start a pipeline from the archived base repository, adding the target
    /// that prepares its input snapshot
    pub fn new(
        name: impl Into<String>,
        pipeline: impl Into<PathBuf>,
        base_repo: impl Into<PathBuf>,
        config: BuildConfig,
    ) -> Self {
        let name = name.into();
        let chain = config.chain(&name);
        let mut commands = Self {
            pipeline: pipeline.into(),
            chain,
            config,
            targets: Vec::new(),
            last_direct: PathBuf::new(),
            last_qbb: PathBuf::new(),
            last_output_run: None,
            name,
        };
        let inputs = commands.add_inputs_repo(base_repo.into());
        commands.last_direct.clone_from(&inputs);
        commands.last_qbb = inputs;
        commands
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output chain every stage prepends its run to
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &str {
        &self.chain
    }

    #[inline]
    #[must_use]
    pub fn last_direct(&self) -> &Path {
        &self.last_direct
    }

    #[inline]
    #[must_use]
    pub fn last_qbb(&self) -> &Path {
        &self.last_qbb
    }

    #[inline]
    #[must_use]
    pub fn last_output_run(&self) -> Option<&str> {
        self.last_output_run.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn targets(&self) -> &[BuildTarget] {
        &self.targets
    }

    /// Add a stage to the main lineage
    pub fn add(mut self, options: StageOptions) -> Result<Self, BuildError> {
        let suffix = options.suffix();
        let output_run = self.config.run(&self.name, &suffix);
        let memory = match &options.auto_retry_mem {
            Some((first, retry)) => Some((parse_memory(first)?, parse_memory(retry)?)),
            None => None,
        };

        let plan = self.add_plan(&PlanSpec {
            suffix: &suffix,
            output_run: &output_run,
            tasks: options.step.iter().cloned().collect(),
            query: &options.query,
            failures: &options.failures,
            skip_existing_in_last: options.skip_existing_in_last,
            extend_run: false,
            clobber_outputs: false,
        })?;
        let exec = ExecSpec {
            suffix: &suffix,
            options: ExecOptions::default().with_memory_per_quantum(memory.map(|(first, _)| first)),
            expect_failure: !options.failures.is_empty(),
            retry_memory: memory.map(|(_, retry)| retry),
        };
        let direct = self.add_direct(&plan, &exec);
        let qbb = self.add_qbb(&plan, &exec, true);

        self.last_direct = direct;
        self.last_qbb = qbb;
        info!(pipeline = %self.name, stage = %suffix, output_run = %output_run, "stage added");
        self.last_output_run = Some(output_run);
        Ok(self)
    }

    /// Add a stage that does not feed later stages.
    ///
    /// In extend mode the stage writes into the last stage's output run and
    /// gets no detached execution.
    pub fn add_side_run(mut self, options: SideStageOptions) -> Result<Self, BuildError> {
        let output_run = if options.extend_run {
            self.last_output_run.clone().ok_or(BuildError::NothingToExtend)?
        } else {
            self.config.run(&self.name, &options.suffix)
        };

        let plan = self.add_plan(&PlanSpec {
            suffix: &options.suffix,
            output_run: &output_run,
            tasks: options.tasks_or_subsets.clone(),
            query: &options.query,
            failures: &options.failures,
            skip_existing_in_last: options.skip_existing_in_last,
            extend_run: options.extend_run,
            clobber_outputs: options.clobber_outputs,
        })?;
        let exec = ExecSpec {
            suffix: &options.suffix,
            options: ExecOptions::default()
                .with_extend_run(options.extend_run)
                .with_clobber_outputs(options.clobber_outputs)
                .with_raise_on_partial_outputs(options.raise_on_partial_outputs),
            expect_failure: options.expect_failure.unwrap_or(!options.failures.is_empty()),
            retry_memory: None,
        };
        self.add_direct(&plan, &exec);
        if !options.extend_run {
            let detached = ExecSpec {
                options: ExecOptions::default().with_raise_on_partial_outputs(options.raise_on_partial_outputs),
                ..exec
            };
            self.add_qbb(&plan, &detached, true);
        }
        info!(
            pipeline = %self.name,
            stage = %options.suffix,
            output_run = %output_run,
            extend_run = options.extend_run,
            "side stage added"
        );
        Ok(self)
    }

    /// Link the final snapshots of both lineages and return every target
    #[must_use]
    pub fn finish(mut self) -> Vec<BuildTarget> {
        for (strategy, source) in [("direct", self.last_direct.clone()), ("qbb", self.last_qbb.clone())] {
            let link = self.path(&format!("{strategy}.tgz"));
            self.targets.push(
                BuildTarget::new(TargetKind::Link, link.clone())
                    .with_source(source.clone())
                    .with_step(BuildStep::Link { source, link }),
            );
        }
        self.targets
    }

    fn path(&self, file: &str) -> PathBuf {
        Path::new(&self.name).join(file)
    }

    fn add_inputs_repo(&mut self, base_repo: PathBuf) -> PathBuf {
        let output = self.path("inputs.tgz");
        let repo = self.path("inputs");
        let target = BuildTarget::new(TargetKind::Inputs, output.clone())
            .with_source(base_repo.clone())
            .with_source(self.pipeline.clone())
            .with_step(BuildStep::Extract {
                archive: base_repo,
                repo: repo.clone(),
            })
            .with_step(BuildStep::Prep {
                repo: repo.clone(),
                pipeline: self.pipeline.clone(),
                run: self.config.misc_run.clone(),
            })
            // execution steps prepend their runs to this chain
            .with_step(BuildStep::FlattenChain {
                repo: repo.clone(),
                chain: self.chain.clone(),
                source: self.config.defaults_collection.clone(),
            })
            .with_step(BuildStep::Archive {
                repo,
                archive: output.clone(),
            });
        self.targets.push(target);
        output
    }

    fn add_plan(&mut self, spec: &PlanSpec<'_>) -> Result<PathBuf, BuildError> {
        let failures = spec
            .failures
            .iter()
            .map(|f| FailureDirective::parse(f))
            .collect::<Result<Vec<_>, _>>()?;
        let request = PlanRequest {
            pipeline: self.pipeline.clone(),
            tasks: spec.tasks.clone(),
            predicate: DataPredicate::parse(spec.query)?,
            input: self.config.defaults_collection.clone(),
            output: self.chain.clone(),
            output_run: spec.output_run.to_string(),
            failures,
            skip_existing_in: spec.skip_existing_in_last.then(|| self.chain.clone()),
            extend_run: spec.extend_run,
            clobber_outputs: spec.clobber_outputs,
            unmocked_dataset_types: self.config.unmocked_dataset_types.clone(),
        };

        let plan = self.path(&format!("{}.qgraph.json", spec.suffix));
        let repo = self.path(&format!("{}-qgraph-repo", spec.suffix));
        // plans and both executions branch from the detached lineage
        let target = BuildTarget::new(TargetKind::Plan, plan.clone())
            .with_log(self.path(&format!("{}-qgraph.log", spec.suffix)))
            .with_source(self.last_qbb.clone())
            .with_source(self.pipeline.clone())
            .with_step(BuildStep::Extract {
                archive: self.last_qbb.clone(),
                repo: repo.clone(),
            })
            .with_step(BuildStep::BuildPlan {
                repo: repo.clone(),
                request,
                plan: plan.clone(),
            })
            .with_step(BuildStep::Remove { path: repo });
        self.targets.push(target);
        Ok(plan)
    }

    fn add_direct(&mut self, plan: &Path, spec: &ExecSpec<'_>) -> PathBuf {
        let output = self.path(&format!("{}-direct.tgz", spec.suffix));
        let repo = self.path(&format!("{}-direct", spec.suffix));
        let mut target = BuildTarget::new(TargetKind::Direct, output.clone())
            .with_log(self.path(&format!("{}-direct.log", spec.suffix)))
            .with_source(self.last_qbb.clone())
            .with_source(plan)
            .with_step(BuildStep::Extract {
                archive: self.last_qbb.clone(),
                repo: repo.clone(),
            })
            .with_step(BuildStep::ExecuteDirect {
                repo: repo.clone(),
                plan: plan.to_path_buf(),
                options: spec.options,
                expect_failure: spec.expect_failure,
            });
        if let Some(memory) = spec.retry_memory {
            target = target.with_step(BuildStep::ExecuteDirect {
                repo: repo.clone(),
                plan: plan.to_path_buf(),
                options: spec
                    .options
                    .with_extend_run(true)
                    .with_clobber_outputs(true)
                    .with_memory_per_quantum(Some(memory)),
                expect_failure: false,
            });
        }
        self.targets.push(target.with_step(BuildStep::Archive {
            repo,
            archive: output.clone(),
        }));
        output
    }

    fn add_qbb(&mut self, plan: &Path, spec: &ExecSpec<'_>, pre_exec_init: bool) -> PathBuf {
        let output = self.path(&format!("{}-qbb.tgz", spec.suffix));
        let repo = self.path(&format!("{}-qbb", spec.suffix));
        let mut target = BuildTarget::new(TargetKind::Detached, output.clone())
            .with_log(self.path(&format!("{}-qbb.log", spec.suffix)))
            .with_source(self.last_qbb.clone())
            .with_source(plan)
            .with_step(BuildStep::Extract {
                archive: self.last_qbb.clone(),
                repo: repo.clone(),
            });
        if pre_exec_init {
            target = target.with_step(BuildStep::DetachedInit {
                repo: repo.clone(),
                plan: plan.to_path_buf(),
            });
        }
        target = target.with_step(BuildStep::DetachedRun {
            repo: repo.clone(),
            plan: plan.to_path_buf(),
            options: spec.options,
            expect_failure: spec.expect_failure,
        });
        if let Some(memory) = spec.retry_memory {
            target = target.with_step(BuildStep::DetachedRun {
                repo: repo.clone(),
                plan: plan.to_path_buf(),
                options: spec.options.with_memory_per_quantum(Some(memory)),
                expect_failure: false,
            });
        }
        self.targets.push(
            target
                .with_step(BuildStep::TransferBack {
                    repo: repo.clone(),
                    plan: plan.to_path_buf(),
                })
                .with_step(BuildStep::Archive {
                    repo,
                    archive: output.clone(),
                }),
        );
        output
    }
}
