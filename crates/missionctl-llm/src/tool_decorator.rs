//! Wraps a provider so every chat turn is routed through a registered
//! tool surface (spec §4.2 "Tool Registry and Result Interceptor").
//!
//! `missionctl-runtime` owns the *mission-scoped* registry (the
//! Interceptor, the synthetic `result_*` tools, oversized-result
//! handling); this module provides the lower-level decorator that any
//! [`LLMProvider`] can be wrapped in to always advertise a fixed tool
//! list and route tool calls back through a name -> implementation map,
//! over the single `chat_with_tools` surface this crate has.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::chat::{ChatMessage, ChatProvider, ChatResponse, StreamChunk, Tool};
use crate::error::LLMError;
use crate::LLMProvider;

/// Adapter interface for a single callable tool implementation.
#[async_trait]
pub trait CallFunctionTool: Send + Sync {
    fn descriptor(&self) -> Tool;
    async fn call(&self, args: Value) -> Result<String, LLMError>;

    /// Name of the provider that surfaced this tool (e.g. a plugin
    /// name), for tools whose identity spans more than this process.
    /// `None` for tools with no such origin.
    fn server_name(&self) -> Option<&str> {
        None
    }
}

/// Decorates an [`LLMProvider`] so every `chat`/`chat_stream` call
/// advertises `registry`'s tools and `call_tool` dispatches through it.
pub struct ToolEnabledProvider {
    inner: std::sync::Arc<dyn LLMProvider>,
    registry: HashMap<String, Box<dyn CallFunctionTool>>,
    tool_list: Vec<Tool>,
}

impl ToolEnabledProvider {
    pub fn new(
        inner: std::sync::Arc<dyn LLMProvider>,
        registry: HashMap<String, Box<dyn CallFunctionTool>>,
    ) -> Self {
        let tool_list = registry.values().map(|t| t.descriptor()).collect();
        ToolEnabledProvider {
            inner,
            registry,
            tool_list,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl ChatProvider for ToolEnabledProvider {
    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<Box<dyn ChatResponse>, LLMError> {
        self.inner.chat_with_tools(messages, Some(&self.tool_list)).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Box<dyn ChatResponse>, LLMError> {
        let to_send = tools.unwrap_or(&self.tool_list);
        self.inner.chat_with_tools(messages, Some(to_send)).await
    }

    async fn chat_stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<StreamChunk, LLMError>> + Send>>,
        LLMError,
    > {
        let to_send = tools.unwrap_or(&self.tool_list);
        self.inner.chat_stream_with_tools(messages, Some(to_send)).await
    }
}

impl LLMProvider for ToolEnabledProvider {
    fn tools(&self) -> Option<&[Tool]> {
        Some(&self.tool_list)
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        args: Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, LLMError>> + Send + 'a>>
    {
        Box::pin(async move {
            let tool = self
                .registry
                .get(name)
                .ok_or_else(|| LLMError::InvalidRequest(format!("unknown tool `{name}`")))?;
            tool.call(args).await
        })
    }
}
