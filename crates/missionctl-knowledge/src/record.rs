//! Re-export of the shared knowledge record type (spec §3 "Knowledge
//! record"). Kept as a distinct module (rather than importing
//! `missionctl_types::KnowledgeRecord` directly everywhere in this crate)
//! so query code reads as operating on "its own" domain type.

pub use missionctl_types::KnowledgeRecord;
