// src/error.rs
use thiserror::Error;

use crate::process::ProcessError;

/// Result type used throughout the exporter
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Custom Error type for the exporter
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Source error: {0}")]
    Source(#[from] ProcessError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Metric error: {0}")]
    Metric(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl From<prometheus::Error> for ExporterError {
    fn from(err: prometheus::Error) -> Self {
        ExporterError::Metric(err.to_string())
    }
}
