use std::path::PathBuf;
use thiserror::Error;

/// Pose estimator error types
///
/// Only the plumbing around the estimator is fallible. Ingest and tick
/// report their outcomes as values and never produce one of these.
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value: {0}")]
    InvalidConfig(String),

    #[error("Session I/O error: {0}")]
    SessionIo(#[from] std::io::Error),

    #[error("Session format error: {0}")]
    SessionFormat(#[from] serde_json::Error),

    #[error("Recalibration failed: {0}")]
    Recalibration(String),
}

pub type Result<T> = std::result::Result<T, EstimatorError>;
