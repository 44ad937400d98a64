//! Shared data model for the mission runtime.
//!
//! This crate owns every type that crosses a component boundary in
//! `missionctl`: missions, tasks, datasets, knowledge records, Q&A cache
//! entries, oversized-result records and the event stream emitted to
//! external presenters. None of these types know how to persist
//! themselves -- that's `missionctl-store`'s job -- they are plain,
//! serializable value types.

pub mod dataset;
pub mod error;
pub mod events;
pub mod interpolate;
pub mod knowledge;
pub mod mission;
pub mod qa;
pub mod schema;
pub mod task;

pub use dataset::{Dataset, DatasetItem};
pub use error::{ErrorKind, MissionError};
pub use events::{Event, EventKind};
pub use knowledge::KnowledgeRecord;
pub use mission::{Mission, MissionId, MissionStatus};
pub use qa::QaCacheEntry;
pub use schema::{FieldType, OutputField, OutputSchema};
pub use task::{IteratorConfig, Task, TaskId, TaskStatus};
