use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("authentication rejected by {url} ({status})")]
    Auth { url: String, status: StatusCode },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: StatusCode },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("no owning employee: {0}")]
    Lookup(String),

    #[error("invalid record: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    Missing(String),

    #[error("stored row is invalid: {0}")]
    InvalidRow(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("incident store update failed: {0}")]
    Store(#[from] StoreError),

    #[error("snapshot publish failed: {0}")]
    Snapshot(#[from] SnapshotError),
}
