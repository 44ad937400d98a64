//! Wraps an [`LLMProvider`] so every non-streaming `chat_with_tools` call
//! is checked against a caller-supplied validator before being returned,
//! retrying the same call up to a fixed number of times when validation
//! fails. Built by [`crate::builder::LLMBuilder`] when a caller sets
//! `.validator(...)`.

use async_trait::async_trait;
use serde_json::Value;

use crate::builder::ValidatorFn;
use crate::chat::{ChatMessage, ChatProvider, ChatResponse, StreamChunk, Tool};
use crate::error::LLMError;
use crate::LLMProvider;

/// Decorates an [`LLMProvider`] with a response validator and a bounded
/// retry count, applied on every `chat_with_tools` call.
pub struct ValidatedLLM {
    inner: std::sync::Arc<dyn LLMProvider>,
    validator: Box<ValidatorFn>,
    attempts: usize,
}

impl ValidatedLLM {
    pub fn new(inner: std::sync::Arc<dyn LLMProvider>, validator: Box<ValidatorFn>, attempts: usize) -> Self {
        ValidatedLLM {
            inner,
            validator,
            attempts: attempts.max(1),
        }
    }
}

#[async_trait]
impl ChatProvider for ValidatedLLM {
    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Box<dyn ChatResponse>, LLMError> {
        let mut last_reason = None;
        for _ in 0..self.attempts {
            let response = self.inner.chat_with_tools(messages, tools).await?;
            match (self.validator)(&response.text().unwrap_or_default()) {
                Ok(()) => return Ok(response),
                Err(reason) => last_reason = Some(reason),
            }
        }
        Err(LLMError::InvalidRequest(format!(
            "response failed validation after {} attempt(s): {}",
            self.attempts,
            last_reason.unwrap_or_default()
        )))
    }

    async fn chat_stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<StreamChunk, LLMError>> + Send>>,
        LLMError,
    > {
        // Streamed chunks can't be validated before they reach the
        // caller, so a stream is handed through unvalidated.
        self.inner.chat_stream_with_tools(messages, tools).await
    }
}

impl LLMProvider for ValidatedLLM {
    fn tools(&self) -> Option<&[Tool]> {
        self.inner.tools()
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        args: Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, LLMError>> + Send + 'a>> {
        self.inner.call_tool(name, args)
    }
}
