//! Durable, resumable LLM conversation sessions (spec §4.1 "LLM Session").
//!
//! A `Session` wraps one [`LLMProvider`] plus the message transcript the
//! provider has been driven over. It exposes three operations: `chat`
//! (append a user turn, drive to a complete assistant message),
//! `chat_stream` (same, but yielding incremental
//! chunks) and `continue_stream` (drive the provider from the current
//! tail with no new user turn -- the operation a crash-recovered
//! Commander/Agent needs when the last persisted message was a tool
//! result still awaiting the model's next step, spec §9 "Coroutine-style
//! control flow").
//!
//! This module intentionally does not know how to persist itself --
//! `missionctl-store` owns durability (spec §4.4); a `Session` is
//! reconstituted from a persisted message list via [`Session::load_messages`]
//! and its caller is responsible for writing new messages back out as they
//! are produced.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::chat::{ChatMessage, ChatProvider, ChatResponse, StreamChunk, Tool};
use crate::error::LLMError;
use crate::LLMProvider;

/// Bounded exponential backoff for transient provider errors (spec §4.1:
/// "transient provider errors trigger bounded exponential-backoff retry
/// inside the session (<=3 attempts, 1/2/4 s)").
const RETRY_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];

/// A durable conversation transcript driven against a single provider.
pub struct Session {
    provider: Arc<dyn LLMProvider>,
    messages: Vec<ChatMessage>,
    tools: Option<Vec<Tool>>,
}

impl Session {
    /// Starts a fresh session with an optional system prompt.
    pub fn new(provider: Arc<dyn LLMProvider>, system_prompt: Option<String>) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage::system().content(system).build());
        }
        Self {
            provider,
            messages,
            tools: None,
        }
    }

    /// Reconstitutes a session from a persisted message list (spec §4.1
    /// "LoadMessages"), used by Resaturation (§4.9) to rebuild a
    /// Commander/Agent's live session without a new user turn.
    pub fn load_messages(provider: Arc<dyn LLMProvider>, messages: Vec<ChatMessage>) -> Self {
        Self {
            provider,
            messages,
            tools: None,
        }
    }

    pub fn set_tools(&mut self, tools: Vec<Tool>) {
        self.tools = Some(tools);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Appends an already-produced message (e.g. a tool observation) to
    /// the transcript without driving the provider. Callers persist the
    /// message themselves before or after this call per the ordering
    /// rules in spec §4.4.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Deep-copies this session for a side-conversation (spec §3
    /// "Session": "clonable: a deep-copy used for side-conversations ...
    /// that must not contaminate the originating session"). Mutating the
    /// clone never affects `self`.
    pub fn clone_detached(&self) -> Session {
        Session {
            provider: self.provider.clone(),
            messages: self.messages.clone(),
            tools: self.tools.clone(),
        }
    }

    /// Appends `user_message`, drives the provider to a complete
    /// assistant turn, appends that turn and returns it.
    pub async fn chat(&mut self, user_message: ChatMessage) -> Result<ChatMessage, LLMError> {
        self.messages.push(user_message);
        let response = self.drive_with_retry().await?;
        let assistant: ChatMessage = response.as_ref().into();
        self.messages.push(assistant.clone());
        Ok(assistant)
    }

    /// Same as [`Session::chat`] but yields incremental chunks as they
    /// arrive. The final assembled assistant message is the caller's
    /// responsibility to record via [`Session::record_assistant_message`]
    /// once the stream completes.
    pub async fn chat_stream(
        &mut self,
        user_message: ChatMessage,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>, LLMError> {
        self.messages.push(user_message);
        self.drive_stream_with_retry().await
    }

    /// Drives the provider from the current tail with **no** new user
    /// message -- the operation §9 "Session healing" calls for when a
    /// crash left the last persisted message as a tool result with no
    /// assistant continuation yet.
    pub async fn continue_stream(
        &mut self,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>, LLMError> {
        self.drive_stream_with_retry().await
    }

    /// Appends a fully-assembled assistant message produced by a caller
    /// that consumed a stream itself (the common case: the Agent/Commander
    /// loop reads `StreamChunk`s to emit live events, then hands the
    /// assembled message back here to keep the transcript authoritative).
    pub fn record_assistant_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    async fn drive_with_retry(&self) -> Result<Box<dyn ChatResponse>, LLMError> {
        let mut attempt = 0;
        loop {
            match self
                .provider
                .chat_with_tools(&self.messages, self.tools.as_deref())
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < RETRY_DELAYS_MS.len() => {
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAYS_MS[attempt])).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn drive_stream_with_retry(
        &self,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>, LLMError> {
        let mut attempt = 0;
        loop {
            match self
                .provider
                .chat_stream_with_tools(&self.messages, self.tools.as_deref())
                .await
            {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_transient() && attempt < RETRY_DELAYS_MS.len() => {
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAYS_MS[attempt])).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// True iff every assistant-emitted tool call in the transcript is
    /// followed by a matching tool message (spec §3 Session invariant,
    /// §8 "well-formed transcript").
    pub fn is_healed(&self) -> bool {
        use crate::chat::{ChatRole, MessageType};

        let mut pending: Vec<String> = Vec::new();
        for message in &self.messages {
            match (&message.role, &message.message_type) {
                (ChatRole::Assistant, MessageType::ToolUse(calls)) => {
                    pending.extend(calls.iter().map(|c| c.id.clone()));
                }
                (ChatRole::Tool, _) => {
                    if let Some(id) = &message.tool_call_id {
                        pending.retain(|p| p != id);
                    }
                }
                _ => {}
            }
        }
        pending.is_empty()
    }
}
