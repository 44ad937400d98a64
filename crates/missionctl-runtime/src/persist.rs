//! Bridges a live [`Session`](missionctl_llm::session::Session)'s message
//! stream to the Persistence Store (spec §4.4) so every message lands
//! durably before its content is released to the next step: the
//! assistant's tool-call message is persisted (as part of the assembled
//! turn) before the loop dispatches any of its calls, and each tool
//! observation is persisted before the loop drives the next turn with it
//! in context. `missionctl-llm::session` deliberately knows nothing about
//! persistence (spec §4.1 docs: "a Session is reconstituted from a
//! persisted message list ... its caller is responsible for writing new
//! messages back out"); this module is that caller-side responsibility,
//! shared by the Agent Loop (C6) and Commander Loop (C7).

use async_trait::async_trait;
use serde_json::to_string as to_json_string;

use missionctl_llm::chat::{ChatMessage, ChatRole, MessageType};
use missionctl_store::Store;

use crate::error::RuntimeError;

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn record(&self, message: &ChatMessage) -> Result<(), RuntimeError>;
}

/// Persists every recorded message as the next row of one session.
pub struct StoreSink {
    pub store: Store,
    pub session_id: String,
}

#[async_trait]
impl MessageSink for StoreSink {
    async fn record(&self, message: &ChatMessage) -> Result<(), RuntimeError> {
        let (message_type_json, tool_call_id, tool_name) = match &message.message_type {
            MessageType::ToolUse(calls) => (
                Some(to_json_string(calls).map_err(|e| RuntimeError::Internal(e.to_string()))?),
                None,
                None,
            ),
            _ => (None, message.tool_call_id.clone(), message.tool_name.clone()),
        };
        self.store
            .append_message(
                &self.session_id,
                role_str(&message.role),
                &message.content,
                message_type_json.as_deref(),
                tool_call_id.as_deref(),
                tool_name.as_deref(),
            )
            .await?;
        Ok(())
    }
}

fn role_str(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

/// A no-op sink for ephemeral side-conversations that are cloned and
/// discarded rather than durably tracked message-by-message (spec §3
/// "Session": "a deep-copy used for side-conversations ... that must not
/// contaminate the originating session"). The *answer* extracted from a
/// side-conversation is what gets persisted (into the Q&A cache), not the
/// conversation itself.
pub struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn record(&self, _message: &ChatMessage) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_sink_appends_and_preserves_role() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_session("s1", "m1", "commander", "task").await.unwrap();
        let sink = StoreSink {
            store: store.clone(),
            session_id: "s1".to_string(),
        };
        sink.record(&ChatMessage::user().content("hi").build()).await.unwrap();
        sink.record(&ChatMessage::assistant().content("hello").build()).await.unwrap();

        let messages = store.list_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }
}
