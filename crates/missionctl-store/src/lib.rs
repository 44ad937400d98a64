//! Durable persistence for the mission runtime (spec C4).
//!
//! One SQLite file per mission root directory holds missions, tasks,
//! sessions and their message transcripts, datasets, the Q&A cache,
//! oversized-result payloads, and the mission event stream. All access
//! goes through [`Store`], which pools connections with `r2d2` and runs
//! every query on a blocking thread.

pub mod error;
pub mod models;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use models::{MessageRecord, ResultRecord, SessionRecord, TaskRow};
pub use store::Store;
