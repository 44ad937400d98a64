//! Query engine over the stream of structured task outputs (spec §4.5).
//!
//! The Knowledge Store does not persist anything itself -- `missionctl-store`
//! already keeps one row per task-instance with its `output_json` -- this
//! crate is the query layer on top: it groups those rows by task name and
//! answers `filter` / `order_by` / `aggregate` queries against the
//! declared output schema for that task.

pub mod error;
pub mod query;
pub mod record;

pub use error::KnowledgeError;
pub use query::{Aggregate, Filter, FilterOp, Query, QueryResult};
pub use record::KnowledgeRecord;

use std::collections::HashMap;

use missionctl_types::OutputSchema;

/// An in-memory view over one task's completed instances, built fresh per
/// query from whatever the Persistence Store currently holds. Cheap to
/// construct since the underlying rows are already loaded by the caller.
pub struct KnowledgeStore<'a> {
    records: &'a [KnowledgeRecord],
    schema: Option<&'a OutputSchema>,
}

impl<'a> KnowledgeStore<'a> {
    pub fn new(records: &'a [KnowledgeRecord], schema: Option<&'a OutputSchema>) -> Self {
        Self { records, schema }
    }

    pub fn run(&self, query: &Query) -> Result<QueryResult, KnowledgeError> {
        query::execute(self.records, self.schema, query)
    }
}

/// Groups a flat set of [`KnowledgeRecord`]s by task name, the shape the
/// runtime holds them in across the whole mission.
pub fn group_by_task(records: Vec<KnowledgeRecord>) -> HashMap<String, Vec<KnowledgeRecord>> {
    let mut grouped: HashMap<String, Vec<KnowledgeRecord>> = HashMap::new();
    for record in records {
        grouped.entry(record.task_name.clone()).or_default().push(record);
    }
    grouped
}
