//! Resaturation & Healing (spec §4.9, component C9): rebuilding live
//! Commander/Agent objects from persisted sessions on resume.

use std::collections::HashMap;

use serde_json::json;

use missionctl_llm::chat::{ChatMessage, ChatMessageBuilder, ChatRole, MessageType};
use missionctl_llm::tool_decorator::CallFunctionTool;
use missionctl_store::MessageRecord;

/// What a resumed session needs before its loop can continue (spec §4.9:
/// "If the final persisted message was an assistant tool-call with no
/// matching result, re-dispatch the tool; if it was a user/tool message
/// with no assistant continuation, invoke ContinueStream").
#[derive(Debug, Clone)]
pub enum HealAction {
    /// The transcript already ends on a complete assistant turn with no
    /// dangling tool call; nothing to do before the loop resumes.
    Healthy,
    /// The last assistant turn made a tool call that was never answered.
    /// Chosen over blindly injecting `unknown_on_resume` (spec §4.6) when
    /// the tool registry can still resolve the call by name -- side
    /// effects are at-least-once (spec §7), so re-dispatch is preferred
    /// when it's actually possible.
    ReDispatchTool {
        tool_call_id: String,
        tool_name: String,
        arguments: String,
    },
    /// The dangling tool call names a tool the registry can no longer
    /// resolve (e.g. a plugin that isn't configured on this resume), or
    /// the caller otherwise can't safely re-dispatch: inject the
    /// synthetic observation spec §4.6 calls for and let the loop
    /// proceed.
    InjectUnknown {
        tool_call_id: String,
        tool_name: String,
    },
    /// The transcript ends on a user or tool message with no assistant
    /// continuation: drive the provider with `ContinueStream`.
    ContinueStream,
}

/// Inspects a persisted transcript and decides how it must be healed
/// before its owning loop (Agent or Commander) resumes.
pub fn diagnose(messages: &[ChatMessage]) -> HealAction {
    let mut pending: HashMap<String, (String, String)> = HashMap::new();
    let mut last_role: Option<&ChatRole> = None;

    for message in messages {
        last_role = Some(&message.role);
        match (&message.role, &message.message_type) {
            (ChatRole::Assistant, MessageType::ToolUse(calls)) => {
                for call in calls {
                    pending.insert(call.id.clone(), (call.function.name.clone(), call.function.arguments.clone()));
                }
            }
            (ChatRole::Tool, _) => {
                if let Some(id) = &message.tool_call_id {
                    pending.remove(id);
                }
            }
            _ => {}
        }
    }

    if let Some((id, (name, arguments))) = pending.into_iter().next() {
        return HealAction::ReDispatchTool {
            tool_call_id: id,
            tool_name: name,
            arguments,
        };
    }

    match last_role {
        Some(ChatRole::Assistant) | None => HealAction::Healthy,
        Some(ChatRole::User) | Some(ChatRole::Tool) => HealAction::ContinueStream,
        Some(ChatRole::System) => HealAction::Healthy,
    }
}

/// Resolves a [`HealAction::ReDispatchTool`] against a tool registry;
/// falls back to [`HealAction::InjectUnknown`] when the name can't be
/// resolved.
pub fn resolve_redispatch(
    action: HealAction,
    tools: &HashMap<String, Box<dyn CallFunctionTool>>,
) -> HealAction {
    match action {
        HealAction::ReDispatchTool {
            tool_call_id,
            tool_name,
            arguments,
        } if !tools.contains_key(&tool_name) => HealAction::InjectUnknown {
            tool_call_id,
            tool_name: {
                let _ = arguments;
                tool_name
            },
        },
        other => other,
    }
}

/// Rebuilds one [`ChatMessage`] from a persisted row, the inverse of
/// `persist::StoreSink::record` (spec §4.9: a resumed loop needs its
/// transcript back exactly as it was before the crash, not just the
/// latest message).
pub fn message_from_record(record: &MessageRecord) -> ChatMessage {
    let role = match record.role.as_str() {
        "system" => ChatRole::System,
        "user" => ChatRole::User,
        "assistant" => ChatRole::Assistant,
        "tool" => ChatRole::Tool,
        other => panic!("unknown persisted message role `{other}`"),
    };
    let mut builder = ChatMessageBuilder::new(role).content(record.content.clone());
    if let Some(id) = &record.tool_call_id {
        builder = builder.tool_call_id(id.clone());
    }
    if let Some(name) = &record.tool_name {
        builder = builder.tool_name(name.clone());
    }
    if let Some(json) = &record.message_type_json {
        if let Ok(calls) = serde_json::from_str(json) {
            builder = builder.tool_use(calls);
        }
    }
    builder.build()
}

/// Rebuilds a whole transcript from persisted rows, in persisted order.
pub fn messages_from_records(records: &[MessageRecord]) -> Vec<ChatMessage> {
    records.iter().map(message_from_record).collect()
}

/// Builds the synthetic observation spec §4.6 calls for
/// (`{"status": "unknown_on_resume"}`).
pub fn unknown_on_resume_message(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> ChatMessage {
    ChatMessage::tool(tool_call_id, tool_name)
        .content(json!({"status": "unknown_on_resume"}).to_string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionctl_llm::{FunctionCall, ToolCall};

    fn tool_call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    #[test]
    fn healthy_when_last_message_is_assistant_text() {
        let messages = vec![
            ChatMessage::user().content("hi").build(),
            ChatMessage::assistant().content("done").build(),
        ];
        assert!(matches!(diagnose(&messages), HealAction::Healthy));
    }

    #[test]
    fn redispatch_when_tool_call_unanswered() {
        let messages = vec![
            ChatMessage::user().content("hi").build(),
            ChatMessage::assistant().content("").tool_use(vec![tool_call("c1", "search")]).build(),
        ];
        match diagnose(&messages) {
            HealAction::ReDispatchTool { tool_call_id, tool_name, .. } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(tool_name, "search");
            }
            other => panic!("expected ReDispatchTool, got {other:?}"),
        }
    }

    #[test]
    fn message_from_record_round_trips_tool_use() {
        let record = MessageRecord {
            session_id: "s1".to_string(),
            seq: 0,
            role: "assistant".to_string(),
            content: String::new(),
            message_type_json: Some(serde_json::to_string(&vec![tool_call("c1", "search")]).unwrap()),
            tool_call_id: None,
            tool_name: None,
        };
        let message = message_from_record(&record);
        assert!(matches!(message.role, ChatRole::Assistant));
        match message.message_type {
            MessageType::ToolUse(calls) => assert_eq!(calls[0].id, "c1"),
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn continue_stream_when_last_message_is_tool_result() {
        let messages = vec![
            ChatMessage::user().content("hi").build(),
            ChatMessage::assistant().content("").tool_use(vec![tool_call("c1", "search")]).build(),
            ChatMessage::tool("c1", "search").content("{}").build(),
        ];
        assert!(matches!(diagnose(&messages), HealAction::ContinueStream));
    }
}
