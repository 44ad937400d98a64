//! Persistence error type (spec §7 `persistence_error`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for missionctl_types::ErrorKind {
    fn from(err: StoreError) -> Self {
        missionctl_types::ErrorKind::Persistence(err.to_string())
    }
}
