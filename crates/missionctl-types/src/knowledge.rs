//! Knowledge record: the structured-output footprint a completed task
//! leaves behind for descendants to query (spec §3, §4.5).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::OutputSchema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub mission_id: String,
    pub task_name: String,
    /// `None` for non-iterated tasks; for an iterated task this is the
    /// per-instance index. The aggregated record for the parent task
    /// (an array of per-instance outputs, spec §4.8 "Completion
    /// aggregation") is stored separately with `index: None`.
    pub index: Option<u32>,
    pub schema: Option<OutputSchema>,
    pub output: Value,
    pub summary: String,
}
