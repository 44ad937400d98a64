//! Streaming LLM sessions, provider abstraction and the orchestration
//! tool-calling surface shared by commanders and agents (spec §4.1 "LLM
//! Session").
//!
//! This crate deliberately stays provider-agnostic: concrete LLM-provider
//! clients (Anthropic, OpenAI, Ollama, ...) are out of scope for the
//! mission runtime (spec §1) and are expected to be registered against
//! [`plugin::ProviderRegistry`] by the embedder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat-based interactions with language models.
pub mod chat;

/// Error types and handling.
pub mod error;

/// Provider-factory registry: resolves a `provider/model` key to a
/// concrete [`LLMProvider`] at mission start (spec §4.1).
pub mod plugin;

/// Pure configuration parameters for LLM providers.
pub mod params;

/// Durable, resumable conversation sessions (spec §4.1).
pub mod session;

/// Wraps a provider so every chat turn is routed through a registered
/// tool surface (spec §4.2).
pub mod tool_decorator;

/// Builder pattern for configuring provider instances.
pub mod builder;

/// Response-validating provider decorator (spec §4.1 provider retry knob).
pub mod validated_llm;

pub use chat::Tool;

/// Core trait every LLM provider backend must implement. A marker trait
/// over [`chat::ChatProvider`]: the mission runtime only ever drives
/// chat/tool-calling, never raw completion or embeddings, so unlike the
/// wider provider ecosystem this crate draws from, it doesn't carry those
/// concerns.
///
/// Implemented explicitly per concrete provider (and by
/// [`tool_decorator::ToolEnabledProvider`]) rather than via a blanket
/// impl over `ChatProvider` -- a blanket impl would make it impossible
/// for a decorator to override `tools()`/`call_tool()` for a type that
/// already implements `ChatProvider`.
pub trait LLMProvider: chat::ChatProvider + Send + Sync {
    fn tools(&self) -> Option<&[Tool]> {
        None
    }

    fn call_tool<'a>(
        &'a self,
        _name: &'a str,
        _args: Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, error::LLMError>> + Send + 'a>>
    {
        Box::pin(async move {
            Err(error::LLMError::ProviderError(
                "tool calling not supported".into(),
            ))
        })
    }
}

/// A function call an LLM wants to make, standardized across providers.
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-serialized arguments.
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Default)]
pub struct Usage {
    #[serde(alias = "prompt_tokens", alias = "input_tokens")]
    pub input_tokens: u32,
    #[serde(alias = "completion_tokens", alias = "output_tokens")]
    pub output_tokens: u32,
}
