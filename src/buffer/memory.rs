use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{BufferError, BufferResult, OutputBuffer, temp_path};
use crate::naming::NameGenerator;

struct MemoryState {
    lines: Vec<String>,
    target: PathBuf,
}

/// Buffer holding every line in memory until commit
pub struct MemoryBuffer {
    names: Arc<dyn NameGenerator>,
    state: Mutex<MemoryState>,
}

impl MemoryBuffer {
    /// Create a memory buffer, reserving its first output name
    pub fn new(names: Arc<dyn NameGenerator>) -> Self {
        let target = names.next_name();
        debug!("Memory buffer reserved {}", target.display());
        Self {
            names,
            state: Mutex::new(MemoryState {
                lines: Vec::new(),
                target,
            }),
        }
    }
}

async fn write_and_rename(temp: &Path, target: &Path, content: &str) -> io::Result<()> {
    let mut file = File::create(temp).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp, target).await
}

/// Write `content` to `target` in one step; nothing appears under `target` on failure
async fn persist(target: &Path, content: &str) -> io::Result<()> {
    let temp = temp_path(target);
    let result = write_and_rename(&temp, target, content).await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&temp).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", temp.display(), e);
            }
        }
    }
    result
}

#[async_trait::async_trait]
impl OutputBuffer for MemoryBuffer {
    async fn write_line(&self, line: String) -> BufferResult<()> {
        self.state.lock().await.lines.push(line);
        Ok(())
    }

    async fn commit(&self) -> BufferResult<Option<PathBuf>> {
        let mut state = self.state.lock().await;
        if state.lines.is_empty() {
            return Ok(None);
        }

        // Reset before persisting so a failure still leaves a fresh cycle behind.
        let lines = std::mem::take(&mut state.lines);
        let target = std::mem::replace(&mut state.target, self.names.next_name());

        match persist(&target, &lines.join("\n")).await {
            Ok(()) => {
                info!("{} lines written to file {}", lines.len(), target.display());
                Ok(Some(target))
            }
            Err(source) => Err(BufferError::Unsaved {
                path: target,
                lines,
                source,
            }),
        }
    }

    async fn pending(&self) -> usize {
        self.state.lock().await.lines.len()
    }

    fn name(&self) -> &str {
        "In memory"
    }
}
