//! Event stream emitted to external presenters (spec §6 "Event stream").
//!
//! A monotonic sequence number, a mission-relative timestamp, and a
//! tagged-union payload so a presenter can pattern-match without a
//! parser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    /// Milliseconds since mission start.
    pub mission_relative_ms: i64,
    pub mission_id: String,
    pub task_name: Option<String>,
    pub index: Option<u32>,
    pub agent_id: Option<String>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    MissionStarted,
    MissionCompleted,
    MissionFailed { reason: String },
    TaskStarted,
    TaskCompleted { summary: String },
    TaskFailed { reason: String },
    IterationStarted,
    IterationCompleted,
    IterationFailed { reason: String },
    IterationRetrying { attempt: u32 },
    AgentStarted { agent_name: String },
    AgentCompleted,
    ToolCall { tool_name: String, args: Value },
    ToolResult { tool_name: String, intercepted: bool },
    CommanderReasoningChunk { text: String },
    CommanderAnswerChunk { text: String },
}
