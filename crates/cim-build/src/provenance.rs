//! Provenance summaries across execution attempts
//!
//! Each attempt pairs the plan that was executed with the catalog as it
//! stood after execution. A quantum succeeded when its metadata dataset is in
//! the plan's output run, was blocked when one of its inputs could not be
//! found, and failed otherwise. Across attempts a quantum that succeeds
//! later is reported recovered and is never also reported failed.

use crate::error::BuildError;
use crate::plan::{PlannedQuantum, QuantumPlan};
use cim_catalog::Catalog;
use cim_dimensions::DataCoordinate;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// State of one quantum after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantumState {
    Succeeded,
    Failed,
    Blocked,
}

/// One executed plan and the catalog it left behind
#[derive(Clone, Copy)]
pub struct Attempt<'a> {
    pub plan: &'a QuantumPlan,
    pub catalog: &'a dyn Catalog,
}

impl<'a> Attempt<'a> {
    pub fn new(plan: &'a QuantumPlan, catalog: &'a dyn Catalog) -> Self {
        Self { plan, catalog }
    }

    pub fn state(&self, quantum: &PlannedQuantum) -> Result<QuantumState, BuildError> {
        let known: BTreeSet<String> = self.catalog.collections().into_iter().map(|(name, _)| name).collect();
        if known.contains(&self.plan.output_run) {
            if let Some(metadata) = quantum.metadata() {
                let run = [self.plan.output_run.clone()];
                if self
                    .catalog
                    .find_dataset(&metadata.dataset_type.name, &metadata.data_id, &run)?
                    .is_some()
                {
                    return Ok(QuantumState::Succeeded);
                }
            }
        }

        let search: Vec<String> = [&self.plan.output_run, &self.plan.output, &self.plan.input]
            .into_iter()
            .filter(|name| known.contains(*name))
            .cloned()
            .collect();
        for input in &quantum.inputs {
            if self
                .catalog
                .find_dataset(&input.dataset_type.name, &input.data_id, &search)?
                .is_none()
            {
                return Ok(QuantumState::Blocked);
            }
        }
        Ok(QuantumState::Failed)
    }
}

/// Merged quantum states for one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub expected: BTreeSet<DataCoordinate>,
    pub successful: BTreeSet<DataCoordinate>,
    pub failed: BTreeSet<DataCoordinate>,
    pub blocked: BTreeSet<DataCoordinate>,
    /// Succeeded after failing or being blocked in an earlier attempt
    pub recovered: BTreeSet<DataCoordinate>,
}

impl TaskSummary {
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.successful.len() == self.expected.len()
    }
}

/// Per-task provenance over a sequence of attempts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvenanceSummary {
    tasks: IndexMap<String, TaskSummary>,
}

impl ProvenanceSummary {
    /// Merge attempts, earliest first
    pub fn assemble(attempts: &[Attempt<'_>]) -> Result<Self, BuildError> {
        let mut history: IndexMap<String, BTreeMap<DataCoordinate, Vec<QuantumState>>> = IndexMap::new();
        for attempt in attempts {
            for quantum in &attempt.plan.quanta {
                let state = attempt.state(quantum)?;
                history
                    .entry(quantum.task.clone())
                    .or_default()
                    .entry(quantum.data_id.clone())
                    .or_default()
                    .push(state);
            }
        }

        let tasks = history
            .into_iter()
            .map(|(task, quanta)| {
                let mut summary = TaskSummary::default();
                for (data_id, states) in quanta {
                    summary.expected.insert(data_id.clone());
                    match states.iter().position(|s| *s == QuantumState::Succeeded) {
                        Some(0) => {
                            summary.successful.insert(data_id);
                        }
                        Some(_) => {
                            summary.successful.insert(data_id.clone());
                            summary.recovered.insert(data_id);
                        }
                        None => match states.last() {
                            Some(QuantumState::Blocked) => {
                                summary.blocked.insert(data_id);
                            }
                            _ => {
                                summary.failed.insert(data_id);
                            }
                        },
                    }
                }
                (task, summary)
            })
            .collect();
        Ok(Self { tasks })
    }

    #[must_use]
    pub fn task(&self, label: &str) -> Option<&TaskSummary> {
        self.tasks.get(label)
    }

    pub fn tasks(&self) -> impl Iterator<Item = (&str, &TaskSummary)> {
        self.tasks.iter().map(|(label, summary)| (label.as_str(), summary))
    }

    /// Every task's quanta all succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(TaskSummary::is_complete)
    }
}
