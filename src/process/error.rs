use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for process operations
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur while running an external command
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnError(#[from] io::Error),

    #[error("{program} exited with non-zero status: {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read from process: {0}")]
    ReadError(io::Error),

    #[error("Other process error: {0}")]
    Other(String),
}

impl ProcessError {
    /// Whether the child ran to completion but reported failure
    pub fn is_exit_error(&self) -> bool {
        matches!(self, ProcessError::NonZeroExit { .. })
    }
}
