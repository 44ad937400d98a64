//! Mission: the top-level execution unit (spec §3 "Mission").

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissionId(pub String);

impl MissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A mission's declarative definition plus its live status.
///
/// The definition (name, commander model, default agents, task list) is
/// immutable after creation; only `status` and the task list's own status
/// fields change over the mission's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub name: String,
    pub commander_model: String,
    #[serde(default)]
    pub default_agents: Vec<String>,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    pub status: MissionStatus,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Mission {
    pub fn new(name: impl Into<String>, commander_model: impl Into<String>) -> Self {
        Self {
            id: MissionId::new(),
            name: name.into(),
            commander_model: commander_model.into(),
            default_agents: Vec::new(),
            inputs: HashMap::new(),
            status: MissionStatus::Pending,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }
}
