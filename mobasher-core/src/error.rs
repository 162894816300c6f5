//! Centralized error type.
//!
//! Every fallible operation in this crate returns [`Result`]. Each variant
//! names the component it originates in and the retry/fail-fast policy the
//! caller is expected to apply (documented on the variant, not enforced by
//! the type).

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel config loader: missing/invalid required field. Fail-fast, never retried.
    #[error("config error: {0}")]
    Config(String),

    /// Capture supervisor: a child process/transport failure. The transcoder
    /// handles its own reconnects; the supervisor applies the hourly restart budget.
    #[error("transport error for channel {channel_id}: {source}")]
    Transport {
        channel_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Segment detector: a file that never reached the full-segment size/duration gate.
    #[error("partial file at {path}: {reason}")]
    PartialFile { path: PathBuf, reason: String },

    /// Persistence layer: a conflicting concurrent write. Caller re-reads and retries once.
    #[error("database conflict: {0}")]
    DbConflict(sqlx::Error),

    /// Read API: the requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Worker: the segment's recorded media path does not exist on disk.
    #[error("missing media path: {path}")]
    MissingMedia { path: PathBuf },

    /// Worker: the analysis model failed to load.
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Worker: the analyser itself raised during `run`.
    #[error("analyser error in stage {stage}: {source}")]
    Analyser {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// Scheduler/worker: the task queue backend could not be reached.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Retention/reset: a destructive operation was attempted without confirmation.
    #[error("refused without confirmation: {0}")]
    RetentionSafety(String),

    /// A path-carrying IO failure, with the operation that was attempted.
    #[error("{op} failed for {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Error::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// True for errors that should never be retried (fix the input and rerun).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::RetentionSafety(_))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::StatusCode;

        let (status, code) = match &self {
            Error::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Error::MissingMedia { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Error::RetentionSafety(_) => (StatusCode::FORBIDDEN, "refused"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(serde_json::json!({
            "error": code,
            "detail": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn not_found_maps_to_404() {
        let response = Error::not_found("no channel with id `x`").into_response();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn config_error_maps_to_422() {
        let response = Error::config("missing field `id`").into_response();
        assert_eq!(response.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn retention_safety_maps_to_403() {
        let response = Error::RetentionSafety("refused".to_string()).into_response();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn db_conflict_maps_to_500() {
        let response = Error::DbConflict(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
