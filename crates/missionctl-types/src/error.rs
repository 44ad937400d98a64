//! Error taxonomy shared across the runtime (spec §7).
//!
//! `ErrorKind` names the *kind* of failure, not a type hierarchy -- every
//! variant is serializable so it can ride inside a persisted task record or
//! an event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("config error: {0}")]
    Config(String),

    #[error("cycle detected among tasks: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("tool error ({tool}): {reason}")]
    Tool { tool: String, reason: String },

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("schema validation error: {0}")]
    SchemaValidation(String),

    #[error("agent iteration cap exceeded")]
    AgentIterExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("resume target not found: {0}")]
    UnknownResume(String),

    #[error("unknown field referenced in query: {0}")]
    UnknownField(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type MissionError = ErrorKind;

impl ErrorKind {
    /// Process exit code this error maps to (spec §6 "Exit codes").
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Config(_)
            | ErrorKind::CycleDetected(_)
            | ErrorKind::UnknownReference(_)
            | ErrorKind::SchemaValidation(_) => 1,
            ErrorKind::Cancelled => 3,
            ErrorKind::UnknownResume(_) => 4,
            _ => 2,
        }
    }
}

impl From<serde_json::Error> for ErrorKind {
    fn from(e: serde_json::Error) -> Self {
        ErrorKind::Internal(format!("json: {e}"))
    }
}
