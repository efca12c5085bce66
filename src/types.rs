//! Core data model: `TaskSpec`, `Workflow`, `TaskState`, `TaskOutcome`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorDescriptor;
use crate::value::Value;

/// Immutable once the workflow is validated.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    pub function_ref: String,
    pub args: Vec<Value>,
    pub deps: BTreeSet<String>,
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub cacheable: bool,
}

impl TaskSpec {
    /// Total attempts = retries + 1.
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Mapping from task id to `TaskSpec`, plus a display name. Construction
/// (schema parsing, dependency/duplicate/cycle validation) lives in
/// `crate::workflow::schema`; by the time a `Workflow` value exists its
/// invariants already hold.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub tasks: BTreeMap<String, TaskSpec>,
}

impl Workflow {
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }
}

/// One of `pending`, `ready`, `running`, `succeeded`, `failed`, `skipped`.
/// A task never leaves `succeeded`, `failed`, or `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Skipped)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// One per task, produced at terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskState,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub wall_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_cause: Option<String>,
    /// `true` when the success was a cache hit rather than an execution.
    pub cached: bool,
}

// `Value` and `ErrorDescriptor` don't derive Serialize/Deserialize in the
// same module, so implement the outcome's serde manually via serde_json
// passthrough where needed. `Value` already round-trips through
// `to_json`/`from_json`; wire that up here so `TaskOutcome` can derive.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(&json).map_err(serde::de::Error::custom)
    }
}
