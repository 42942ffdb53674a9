use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for process operations
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur during process operations
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn process {program}: {source}")]
    SpawnError { program: String, source: io::Error },

    #[error("Failed to wait for process: {0}")]
    WaitError(io::Error),

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process killed: {0}")]
    ProcessKilled(String),

    #[error("Failed to read from process: {0}")]
    ReadError(io::Error),

    #[error("Process output unusable after {0} consecutive read errors")]
    StreamUnusable(usize),

    #[error("Process channel error: {0}")]
    ChannelError(String),

    #[error("Other process error: {0}")]
    Other(String),
}

impl From<tokio::sync::mpsc::error::SendError<String>> for ProcessError {
    fn from(err: tokio::sync::mpsc::error::SendError<String>) -> Self {
        ProcessError::ChannelError(err.to_string())
    }
}
