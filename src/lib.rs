//! Capture a child process's output into atomically committed files and
//! hand each file to a post-processing command

pub mod buffer;
pub mod config;
pub mod error;
pub mod monitor;
pub mod naming;
pub mod pipeline;
pub mod process;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::buffer::{BufferError, FileBuffer, MemoryBuffer, OutputBuffer, create_buffer};
    pub use crate::config::{BufferKind, MonitorConfig};
    pub use crate::error::{MonitorError, Result};
    pub use crate::monitor::Monitor;
    pub use crate::naming::{NameGenerator, TemplateNameGenerator};
    pub use crate::pipeline::{DispatchQueue, FlushScheduler, InFlight, dispatch_queue};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
