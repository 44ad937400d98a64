//! Resolves a tool reference named in `agents.<name>.tools` (spec §6) to a
//! callable implementation. Concrete tool implementations are delivered by
//! out-of-process plugin binaries and are explicitly an external
//! collaborator (spec §1); this module is the seam the Scheduler uses to
//! reach them without hard-coding any one tool's behavior into the core.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use missionctl_llm::chat::Tool;
use missionctl_llm::error::LLMError;
use missionctl_llm::tool_decorator::CallFunctionTool;

use crate::config::PluginConfig;
use crate::error::RuntimeError;
use crate::plugin_host::{tools_for_plugin, PluginHost};

#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn resolve(&self, tool_ref: &str) -> Result<Box<dyn CallFunctionTool>, RuntimeError>;
}

/// Resolves `"plugin_name.tool_name"` references against a [`PluginHost`],
/// the default source for tools delivered by out-of-process plugin
/// binaries (spec §1, §4.3).
pub struct PluginToolSource {
    host: Arc<PluginHost>,
    plugins: HashMap<String, PluginConfig>,
}

impl PluginToolSource {
    pub fn new(host: Arc<PluginHost>, plugins: HashMap<String, PluginConfig>) -> Self {
        PluginToolSource { host, plugins }
    }
}

#[async_trait]
impl ToolSource for PluginToolSource {
    async fn resolve(&self, tool_ref: &str) -> Result<Box<dyn CallFunctionTool>, RuntimeError> {
        let (plugin_name, tool_name) = tool_ref.split_once('.').ok_or_else(|| {
            RuntimeError::Config(format!("tool reference `{tool_ref}` is not of the form `plugin.tool`"))
        })?;
        let cfg = self.plugins.get(plugin_name).ok_or_else(|| {
            RuntimeError::UnknownReference(format!("tool `{tool_ref}` names unconfigured plugin `{plugin_name}`"))
        })?;
        let loaded = self.host.ensure_loaded(plugin_name, &cfg.version, None, &cfg.settings).await?;
        let tools = tools_for_plugin(loaded).await?;
        tools
            .into_iter()
            .find(|t| t.descriptor.function.name == tool_name)
            .map(|t| Box::new(t) as Box<dyn CallFunctionTool>)
            .ok_or_else(|| {
                RuntimeError::UnknownReference(format!("plugin `{plugin_name}` does not expose tool `{tool_name}`"))
            })
    }
}

/// Wraps an `Arc`-shared tool so it can be handed out repeatedly as a
/// fresh `Box<dyn CallFunctionTool>` per delegation.
struct SharedTool(Arc<dyn CallFunctionTool>);

#[async_trait]
impl CallFunctionTool for SharedTool {
    fn descriptor(&self) -> Tool {
        self.0.descriptor()
    }

    fn server_name(&self) -> Option<&str> {
        self.0.server_name()
    }

    async fn call(&self, args: Value) -> Result<String, LLMError> {
        self.0.call(args).await
    }
}

/// A fixed lookup table of pre-built tools. Used by tests and by
/// embedders that register native, in-process tools instead of routing
/// through a plugin binary.
#[derive(Default)]
pub struct StaticToolSource {
    tools: HashMap<String, Arc<dyn CallFunctionTool>>,
}

impl StaticToolSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tool: Arc<dyn CallFunctionTool>) {
        self.tools.insert(name.into(), tool);
    }
}

#[async_trait]
impl ToolSource for StaticToolSource {
    async fn resolve(&self, tool_ref: &str) -> Result<Box<dyn CallFunctionTool>, RuntimeError> {
        self.tools
            .get(tool_ref)
            .cloned()
            .map(|tool| Box::new(SharedTool(tool)) as Box<dyn CallFunctionTool>)
            .ok_or_else(|| RuntimeError::UnknownReference(format!("no static tool registered for `{tool_ref}`")))
    }
}

/// Tries each source in order, the composition an embedder uses to mix
/// plugin-delivered tools with a handful of natively registered ones.
pub struct CompositeToolSource {
    sources: Vec<Arc<dyn ToolSource>>,
}

impl CompositeToolSource {
    pub fn new(sources: Vec<Arc<dyn ToolSource>>) -> Self {
        CompositeToolSource { sources }
    }
}

#[async_trait]
impl ToolSource for CompositeToolSource {
    async fn resolve(&self, tool_ref: &str) -> Result<Box<dyn CallFunctionTool>, RuntimeError> {
        let mut last_err = None;
        for source in &self.sources {
            match source.resolve(tool_ref).await {
                Ok(tool) => return Ok(tool),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| RuntimeError::UnknownReference(format!("no tool source configured for `{tool_ref}`"))))
    }
}
