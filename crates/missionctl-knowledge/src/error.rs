//! Knowledge Store error type (spec §4.5, §7 `unknown_field`).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KnowledgeError {
    #[error("unknown field referenced in query: {0}")]
    UnknownField(String),
    #[error("unsupported aggregate `{0}` for this query")]
    UnsupportedAggregate(String),
}

impl From<KnowledgeError> for missionctl_types::ErrorKind {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::UnknownField(f) => missionctl_types::ErrorKind::UnknownField(f),
            KnowledgeError::UnsupportedAggregate(a) => {
                missionctl_types::ErrorKind::Internal(format!("unsupported aggregate: {a}"))
            }
        }
    }
}
