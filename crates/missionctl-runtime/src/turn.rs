//! Drives one assistant turn out of a [`Session`] and assembles it from
//! the chunk stream (spec §4.1 "ChatStream"), shared by the Agent Loop
//! (C6) and Commander Loop (C7) so both get identical event emission and
//! transcript bookkeeping.

use futures::StreamExt;

use missionctl_llm::chat::{ChatMessage, StreamChunk};
use missionctl_llm::session::Session;
use missionctl_llm::ToolCall;

use crate::error::RuntimeError;
use crate::persist::MessageSink;

/// Either drives `session` with a fresh user message, or -- when `None`
/// -- continues from the current tail (spec §4.1 "ContinueStream"; spec
/// §9 resume case "invoke ContinueStream"). `sink` persists the user turn
/// and the assembled assistant turn before either is released to the
/// caller, so a crash between turns never loses a message (spec §4.4).
pub async fn drive_turn(
    session: &mut Session,
    user_message: Option<ChatMessage>,
    sink: &dyn MessageSink,
    mut on_text_chunk: impl FnMut(&str),
) -> Result<ChatMessage, RuntimeError> {
    let mut stream = match user_message {
        Some(msg) => {
            sink.record(&msg).await?;
            session.chat_stream(msg).await?
        }
        None => session.continue_stream().await?,
    };

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Text(delta) => {
                on_text_chunk(&delta);
                text.push_str(&delta);
            }
            StreamChunk::ToolUseComplete { tool_call, .. } => {
                tool_calls.push(tool_call);
            }
            StreamChunk::Done { .. } | StreamChunk::Usage(_) | StreamChunk::ToolUseStart { .. } | StreamChunk::ToolUseInputDelta { .. } => {}
        }
    }

    let mut builder = ChatMessage::assistant().content(text);
    if !tool_calls.is_empty() {
        builder = builder.tool_use(tool_calls);
    }
    let assembled = builder.build();
    session.record_assistant_message(assembled.clone());
    sink.record(&assembled).await?;
    Ok(assembled)
}

/// Extracts the `ToolCall`s from an assembled assistant turn, if any.
pub fn tool_calls_of(message: &ChatMessage) -> Vec<ToolCall> {
    match &message.message_type {
        missionctl_llm::chat::MessageType::ToolUse(calls) => calls.clone(),
        _ => Vec::new(),
    }
}
