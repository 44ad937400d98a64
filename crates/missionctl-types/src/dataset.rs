//! Dataset: a named, ordered list of iteration items (spec §3 "Dataset").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub mission_id: String,
    pub name: String,
    /// Set once all items that will ever belong to this dataset are
    /// written. The scheduler's iteration fan-out (spec §4.8) waits on
    /// this flag rather than a fixed item count, since a dynamic dataset
    /// may be populated incrementally by a dependency task's tool calls.
    pub populated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetItem {
    pub mission_id: String,
    pub dataset: String,
    pub index: u32,
    pub item: Value,
}
