//! Task and mission-DAG node types (spec §3 "Task").

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::OutputSchema;

/// Identifies one task *instance*: a mission, a task name, and -- for
/// iterated tasks -- the fan-out index. Two instances of the same
/// iterated task share `mission_id`/`name` but differ in `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub mission_id: String,
    pub name: String,
    pub index: Option<u32>,
}

impl TaskId {
    pub fn new(mission_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            name: name.into(),
            index: None,
        }
    }

    pub fn iteration(mission_id: impl Into<String>, name: impl Into<String>, index: u32) -> Self {
        Self {
            mission_id: mission_id.into(),
            name: name.into(),
            index: Some(index),
        }
    }

    /// Stable string key used for persistence and as a map key; e.g.
    /// `"m1/fetch"` or `"m1/sq#2"`.
    pub fn key(&self) -> String {
        match self.index {
            Some(i) => format!("{}/{}#{}", self.mission_id, self.name, i),
            None => format!("{}/{}", self.mission_id, self.name),
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Declares that a task fans out over a dataset (spec §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IteratorConfig {
    /// Name of the dataset to iterate over.
    pub dataset: String,
    #[serde(default)]
    pub parallel: bool,
    /// Bound on concurrently-running instances when `parallel` is true.
    /// Defaults to the instance count at fan-out time if unset.
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    #[serde(default)]
    pub max_retries: u32,
    /// When true, index 0 runs alone to completion before the rest unlock.
    #[serde(default)]
    pub smoketest: bool,
}

/// A node in the mission DAG plus everything about its current run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub mission_id: String,
    pub name: String,
    pub index: Option<u32>,

    /// Natural-language objective, possibly containing `${inputs.*}`,
    /// `${item.*}` and `${tasks.<name>.*}` interpolation markers.
    pub objective: String,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub output_schema: Option<OutputSchema>,

    #[serde(default)]
    pub iterator: Option<IteratorConfig>,

    /// Overrides the mission's default agent set for this task only.
    #[serde(default)]
    pub agents: Option<Vec<String>>,

    pub status: TaskStatus,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub output: Option<Value>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub attempt: u32,
}

impl Task {
    pub fn new(mission_id: impl Into<String>, name: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            name: name.into(),
            index: None,
            objective: objective.into(),
            depends_on: Vec::new(),
            output_schema: None,
            iterator: None,
            agents: None,
            status: TaskStatus::Pending,
            summary: None,
            output: None,
            error: None,
            attempt: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        TaskId {
            mission_id: self.mission_id.clone(),
            name: self.name.clone(),
            index: self.index,
        }
    }

    pub fn is_iterated(&self) -> bool {
        self.iterator.is_some()
    }
}
