//! The declarative configuration surface consumed from an external loader
//! (spec §6 "Configuration surface"). The loader itself -- resolving
//! `${env}`/secret-store references, merging multiple files, etc. -- is out
//! of scope for the core (spec §1); this module only owns the *shape* the
//! runtime needs handed to it, mirroring how a provider/plugin config table
//! owns its own deserialization shape without owning secret resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use missionctl_types::{IteratorConfig, OutputSchema};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariableDecl {
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub version: String,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub model: String,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    pub objective: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub output_schema: Option<OutputSchema>,
    #[serde(default)]
    pub iterator: Option<IteratorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionDef {
    pub commander: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    pub tasks: Vec<TaskDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDef {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub schema: Option<OutputSchema>,
}

/// The whole declarative bundle (spec §6). Deserializable from TOML or
/// JSON; the caller picks the format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigBundle {
    #[serde(default)]
    pub variables: HashMap<String, VariableDecl>,
    #[serde(default)]
    pub models: HashMap<String, HashMap<String, ModelConfig>>,
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
    #[serde(default)]
    pub agents: HashMap<String, AgentDef>,
    #[serde(default)]
    pub missions: HashMap<String, MissionDef>,
    #[serde(default)]
    pub datasets: HashMap<String, DatasetDef>,
}

impl ConfigBundle {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
