use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for buffer operations
pub type BufferResult<T> = std::result::Result<T, BufferError>;

/// Errors that can occur while accumulating or committing lines
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Failed to open temporary file {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to write batch to {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error(
        "Write to file error ({}): {source}\nUnsaved lines:\n{}",
        .path.display(),
        .lines.join("\n")
    )]
    Unsaved {
        path: PathBuf,
        lines: Vec<String>,
        source: io::Error,
    },

    #[error(
        "Commit of {} aborted after write failure ({reason}); partial data left in {}\nUnsaved lines:\n{}",
        .target.display(),
        .temp.display(),
        .lines.join("\n")
    )]
    Aborted {
        temp: PathBuf,
        target: PathBuf,
        reason: String,
        lines: Vec<String>,
    },

    #[error("Failed to rename {} to {}: {source}", .temp.display(), .target.display())]
    Finalize {
        temp: PathBuf,
        target: PathBuf,
        source: io::Error,
    },

    #[error("Failed to remove empty temporary file {}: {source}", .path.display())]
    Discard { path: PathBuf, source: io::Error },
}

impl BufferError {
    /// Lines that were accepted but are not in any file, if the error carries them
    pub fn unsaved_lines(&self) -> &[String] {
        match self {
            BufferError::Unsaved { lines, .. } | BufferError::Aborted { lines, .. } => lines,
            _ => &[],
        }
    }
}
