//! Error types for the persistence and configuration layers

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReaperError>;

#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Flush worker is no longer running")]
    WorkerUnavailable,
}

impl ReaperError {
    /// Short stable code, used as a structured logging field
    pub fn code(&self) -> &'static str {
        match self {
            ReaperError::Io(_) => "IO",
            ReaperError::Json(_) => "JSON",
            ReaperError::InvalidFormat(_) => "INVALID_FORMAT",
            ReaperError::InvalidConfig(_) => "INVALID_CONFIG",
            ReaperError::WorkerUnavailable => "WORKER_UNAVAILABLE",
        }
    }
}
