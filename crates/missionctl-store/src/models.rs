//! Row types returned by [`crate::Store`]. Deliberately independent of
//! `missionctl-llm`'s `ChatMessage` -- persistence is a leaf concern (spec
//! §1: "out of scope ... the SQL driver itself") and the runtime crate is
//! what knows how to translate between the two.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub mission_id: String,
    pub owner_kind: String,
    pub owner_ref: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    /// Serialized `MessageType` payload (tool calls, images, ...), opaque
    /// to this crate.
    pub message_type_json: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub mission_id: String,
    pub name: String,
    pub index: Option<i64>,
    pub status: String,
    pub output: Option<Value>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub attempt: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub mission_id: String,
    pub result_id: String,
    pub tool_name: String,
    pub payload: Value,
    pub sample: Value,
}
