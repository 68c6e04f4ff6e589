//! Simulated failure directives
//!
//! A directive names a task label, a failure kind and a data query, plus an
//! optional memory requirement for out-of-memory failures:
//!
//! ```text
//! _mock_calibrate:error:visit = 96860 AND detector = 42
//! _mock_isr:memory:detector = 50:4GB
//! ```

use crate::error::BuildError;
use crate::predicate::DataPredicate;
use cim_dimensions::DataCoordinate;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

/// How a targeted unit of work fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Raise an exception; no outputs
    Error,
    /// Simulated out-of-memory; fires only under a low enough limit
    Memory,
    /// Write some declared outputs, then report partial success
    PartialOutputs,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Memory => "memory",
            Self::PartialOutputs => "partial-outputs",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "memory" => Ok(Self::Memory),
            "partial-outputs" | "partial_outputs" => Ok(Self::PartialOutputs),
            other => Err(format!("unknown failure kind {other:?}")),
        }
    }
}

/// Parse a memory size: a bare number is megabytes, otherwise one of the
/// suffixes `B`, `KB`/`KiB`, `MB`/`MiB`, `GB`/`GiB` (binary multiples).
pub fn parse_memory(text: &str) -> Result<u64, BuildError> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| BuildError::InvalidMemory(text.to_string()))?;
    let scale = match unit.trim().to_ascii_lowercase().as_str() {
        "b" => 1,
        "kb" | "kib" | "k" => KIB,
        "" | "mb" | "mib" | "m" => MIB,
        "gb" | "gib" | "g" => GIB,
        _ => return Err(BuildError::InvalidMemory(text.to_string())),
    };
    value
        .checked_mul(scale)
        .ok_or_else(|| BuildError::InvalidMemory(text.to_string()))
}

/// Marks the quanta of one task that must fail deterministically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDirective {
    pub task: String,
    pub kind: FailureKind,
    #[serde(rename = "where")]
    pub predicate: DataPredicate,
    /// Bytes; a memory failure fires only when the limit is below this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_required: Option<u64>,
}

impl FailureDirective {
    pub fn parse(directive: &str) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidDirective {
            directive: directive.to_string(),
            reason,
        };
        let mut parts = directive.splitn(3, ':');
        let (Some(task), Some(kind), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected task:kind:where[:memory_required]".into()));
        };
        let task = task.trim();
        if task.is_empty() {
            return Err(invalid("empty task label".into()));
        }
        let kind: FailureKind = kind.parse().map_err(invalid)?;

        // only a memory directive carries a trailing requirement; any other
        // query keeps its colons
        let (query, memory_required) = if kind == FailureKind::Memory {
            let Some((query, memory)) = rest.rsplit_once(':') else {
                return Err(invalid("memory failure needs a memory requirement".into()));
            };
            (query, Some(parse_memory(memory)?))
        } else {
            (rest, None)
        };
        Ok(Self {
            task: task.to_string(),
            kind,
            predicate: DataPredicate::parse(query)?,
            memory_required,
        })
    }

    /// Whether this directive makes the quantum of `task` at `data_id` fail
    /// when each quantum may use at most `memory_limit` bytes
    #[must_use]
    pub fn fires(&self, task: &str, data_id: &DataCoordinate, memory_limit: Option<u64>) -> bool {
        if self.task != task || !self.predicate.matches(data_id) {
            return false;
        }
        match (self.kind, self.memory_required) {
            (FailureKind::Memory, Some(required)) => memory_limit.is_some_and(|limit| limit < required),
            (FailureKind::Memory, None) => false,
            (FailureKind::Error | FailureKind::PartialOutputs, _) => true,
        }
    }
}

impl FromStr for FailureDirective {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for FailureDirective {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.task, self.kind, self.predicate)?;
        if let Some(required) = self.memory_required {
            write!(f, ":{required}B")?;
        }
        Ok(())
    }
}

/// First directive that fires for a quantum
#[must_use]
pub fn first_firing<'a>(
    directives: &'a [FailureDirective],
    task: &str,
    data_id: &DataCoordinate,
    memory_limit: Option<u64>,
) -> Option<&'a FailureDirective> {
    directives
        .iter()
        .find(|directive| directive.fires(task, data_id, memory_limit))
}
