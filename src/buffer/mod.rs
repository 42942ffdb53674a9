//! Line buffers committed atomically to output files
//!
//! A buffer accepts captured lines and, on commit, persists every line
//! accepted since the previous commit into one file under a name reserved
//! in advance. Files only ever appear under their final name complete:
//! content is written to `<name>.tmp` and renamed into place.

mod error;
mod file;
mod memory;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use error::{BufferError, BufferResult};
pub use file::FileBuffer;
pub use memory::MemoryBuffer;

use crate::config::BufferKind;
use crate::naming::NameGenerator;

/// Default number of lines a file buffer holds before appending them to disk
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Accumulates captured lines and commits them to uniquely named files
#[async_trait::async_trait]
pub trait OutputBuffer: Send + Sync + 'static {
    /// Append a line; lines keep the order in which they were written
    async fn write_line(&self, line: String) -> BufferResult<()>;

    /// Persist everything accepted since the last commit.
    ///
    /// Returns the committed file, or `None` when there was nothing to
    /// commit. The buffer is reset for the next cycle whether or not the
    /// commit succeeded.
    async fn commit(&self) -> BufferResult<Option<PathBuf>>;

    /// Lines accepted since the last commit
    async fn pending(&self) -> usize;

    /// Release storage held for a cycle that will never be committed
    async fn close(&self) -> BufferResult<()> {
        Ok(())
    }

    /// Human-readable name of the storage strategy
    fn name(&self) -> &str;
}

/// Create the buffer selected by configuration
pub async fn create_buffer(
    kind: BufferKind,
    names: Arc<dyn NameGenerator>,
    batch_size: usize,
) -> BufferResult<Arc<dyn OutputBuffer>> {
    let buffer: Arc<dyn OutputBuffer> = match kind {
        BufferKind::File => Arc::new(FileBuffer::with_batch_size(names, batch_size).await?),
        BufferKind::Memory => Arc::new(MemoryBuffer::new(names)),
    };
    Ok(buffer)
}

/// Temporary sibling of `target` that content is staged in before rename
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
