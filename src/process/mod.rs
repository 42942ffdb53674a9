//! Child process boundary
//!
//! Spawning the monitored command, reading its output as lines, and running
//! post-processing commands to completion.

pub mod capture;
mod command;
mod error;

pub use capture::{LineReader, MAX_CONSECUTIVE_ERRORS, capture_lines};
pub use command::{Command, ProcessHandle, log_stderr};
pub use error::{ProcessError, ProcessResult};
