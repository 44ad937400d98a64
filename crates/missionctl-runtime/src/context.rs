//! Ambient, mission-scoped wiring shared by every Commander/Agent Loop the
//! Scheduler (C8) spins up: provider resolution, tool resolution through
//! the Interceptor (C2), and the fixed synthetic result-retrieval tools
//! (spec §4.2 step c/d). One struct holding every shared collaborator for
//! a single mission run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use missionctl_llm::plugin::ProviderRegistry;
use missionctl_llm::tool_decorator::CallFunctionTool;
use missionctl_llm::LLMProvider;
use missionctl_store::Store;

use crate::config::{AgentDef, ModelConfig};
use crate::error::RuntimeError;
use crate::events::EventBus;
use crate::interceptor::{Interceptor, ResultChunkTool, ResultFilterTool, ResultItemsTool, ResultToDatasetTool};
use crate::tool_source::ToolSource;

/// Everything C1-C5 hand the Scheduler so it never has to reach past this
/// struct to build a Commander or Agent session (spec §4.8: the Scheduler
/// "is the only component with visibility across sibling and ancestor
/// Commanders").
pub struct RuntimeContext {
    pub mission_id: String,
    pub store: Store,
    pub events: EventBus,
    pub interceptor: Interceptor,
    pub providers: Arc<ProviderRegistry>,
    pub tool_source: Arc<dyn ToolSource>,
    /// `models[provider_name][model_name]`, the shape spec §6's
    /// configuration surface declares (`ConfigBundle::models`).
    pub models: HashMap<String, HashMap<String, ModelConfig>>,
    pub agents: HashMap<String, AgentDef>,
}

impl RuntimeContext {
    /// Resolves `model_key` (`"provider/model"`, an [`AgentDef::model`]
    /// value) to a live provider, looking up its [`ModelConfig`] by the
    /// same split the registry itself uses.
    pub fn resolve_provider(&self, model_key: &str) -> Result<Arc<dyn LLMProvider>, RuntimeError> {
        let (provider_name, model_name) = model_key.split_once('/').ok_or_else(|| {
            RuntimeError::Config(format!("model key `{model_key}` is not of the form `provider/model`"))
        })?;
        let cfg = self
            .models
            .get(provider_name)
            .and_then(|models| models.get(model_name))
            .ok_or_else(|| {
                RuntimeError::UnknownReference(format!("no configuration for model `{model_key}`"))
            })?;
        let cfg_value: Value = serde_json::to_value(cfg)?;
        Ok(self.providers.resolve(model_key, &cfg_value)?)
    }

    /// Resolves an agent's configured `tools` list through the
    /// [`ToolSource`], wrapping every one in the mission's [`Interceptor`]
    /// so oversized observations are offloaded before a session ever sees
    /// them (spec §4.2).
    pub async fn tools_for_agent(
        &self,
        agent: &AgentDef,
    ) -> Result<HashMap<String, Box<dyn CallFunctionTool>>, RuntimeError> {
        let mut tools = HashMap::new();
        for tool_ref in &agent.tools {
            let resolved = self.tool_source.resolve(tool_ref).await?;
            let name = resolved.descriptor().function.name.clone();
            let intercepted = crate::interceptor::InterceptedTool::new(resolved, self.interceptor.clone());
            tools.insert(name, Box::new(intercepted) as Box<dyn CallFunctionTool>);
        }
        Ok(tools)
    }

    /// The fixed `result_items`/`result_chunk`/`result_filter`/
    /// `result_to_dataset` surface offered alongside an agent's configured
    /// tools (spec §4.2 step c: "the model is told the names of four
    /// synthetic retrieval tools").
    pub fn synthetic_result_tools(&self) -> HashMap<String, Box<dyn CallFunctionTool>> {
        let store = self.interceptor.store().clone();
        let mission_id = self.mission_id.clone();
        let mut tools: HashMap<String, Box<dyn CallFunctionTool>> = HashMap::new();
        tools.insert(
            "result_items".to_string(),
            Box::new(ResultItemsTool { store: store.clone(), mission_id: mission_id.clone() }),
        );
        tools.insert(
            "result_chunk".to_string(),
            Box::new(ResultChunkTool { store: store.clone(), mission_id: mission_id.clone() }),
        );
        tools.insert(
            "result_filter".to_string(),
            Box::new(ResultFilterTool { store: store.clone(), mission_id: mission_id.clone() }),
        );
        tools.insert(
            "result_to_dataset".to_string(),
            Box::new(ResultToDatasetTool { store, mission_id }),
        );
        tools
    }
}
