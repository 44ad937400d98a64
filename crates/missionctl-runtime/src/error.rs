//! Runtime-local error type; every variant maps onto the shared
//! [`missionctl_types::ErrorKind`] taxonomy (spec §7) at the crate
//! boundary.

use thiserror::Error;

use missionctl_llm::error::LLMError;
use missionctl_store::StoreError;
use missionctl_types::ErrorKind;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error("tool `{tool}` failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("agent iteration cap exceeded")]
    AgentIterExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("resume target not found: {0}")]
    UnknownResume(String),

    #[error("cycle detected among tasks: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("schema validation error: {0}")]
    SchemaValidation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Internal(format!("json: {err}"))
    }
}

impl From<RuntimeError> for ErrorKind {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Config(msg) => ErrorKind::Config(msg),
            RuntimeError::Store(e) => ErrorKind::Persistence(e.to_string()),
            RuntimeError::Provider(e) => ErrorKind::Provider(e.to_string()),
            RuntimeError::Tool { tool, reason } => ErrorKind::Tool { tool, reason },
            RuntimeError::Plugin(msg) => ErrorKind::Plugin(msg),
            RuntimeError::AgentIterExceeded => ErrorKind::AgentIterExceeded,
            RuntimeError::Cancelled => ErrorKind::Cancelled,
            RuntimeError::UnknownResume(id) => ErrorKind::UnknownResume(id),
            RuntimeError::CycleDetected(names) => ErrorKind::CycleDetected(names),
            RuntimeError::UnknownReference(r) => ErrorKind::UnknownReference(r),
            RuntimeError::SchemaValidation(msg) => ErrorKind::SchemaValidation(msg),
            RuntimeError::Internal(msg) => ErrorKind::Internal(msg),
        }
    }
}
