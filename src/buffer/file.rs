use log::{debug, error, info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{BufferError, BufferResult, DEFAULT_BATCH_SIZE, OutputBuffer, temp_path};
use crate::naming::NameGenerator;

/// State of one commit cycle, guarded as a unit
struct FileState {
    /// Open temporary file; `None` until it can be (re)opened
    file: Option<File>,
    /// Name reserved for this cycle's committed file
    target: PathBuf,
    /// Lines not yet appended to the temporary file
    pending: Vec<String>,
    /// Lines accepted this cycle
    accepted: usize,
    /// Lines already appended to the temporary file
    flushed: usize,
    /// Set once a batch write failed; the cycle can no longer be committed
    failure: Option<String>,
}

impl FileState {
    fn temp(&self) -> PathBuf {
        temp_path(&self.target)
    }

    /// Append pending lines to the temporary file and sync it
    async fn append_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => File::create(self.temp()).await?,
        };
        let file = self.file.insert(file);

        let mut chunk = self.pending.join("\n");
        if self.flushed > 0 {
            chunk.insert(0, '\n');
        }
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;

        self.flushed += self.pending.len();
        self.pending.clear();
        Ok(())
    }
}

/// Buffer appending lines in batches to a temporary file that is renamed
/// into place on commit
pub struct FileBuffer {
    names: Arc<dyn NameGenerator>,
    batch_size: usize,
    state: Mutex<FileState>,
}

impl FileBuffer {
    /// Create a file buffer with the default batch size
    pub async fn new(names: Arc<dyn NameGenerator>) -> BufferResult<Self> {
        Self::with_batch_size(names, DEFAULT_BATCH_SIZE).await
    }

    /// Create a file buffer writing every `batch_size` lines to disk.
    ///
    /// Fails if the first temporary file cannot be created.
    pub async fn with_batch_size(
        names: Arc<dyn NameGenerator>,
        batch_size: usize,
    ) -> BufferResult<Self> {
        let target = names.next_name();
        let temp = temp_path(&target);
        let file = match File::create(&temp).await {
            Ok(file) => file,
            Err(source) => return Err(BufferError::Open { path: temp, source }),
        };
        debug!("File buffer staging into {}", temp.display());

        Ok(Self {
            names,
            batch_size: batch_size.max(1),
            state: Mutex::new(FileState {
                file: Some(file),
                target,
                pending: Vec::new(),
                accepted: 0,
                flushed: 0,
                failure: None,
            }),
        })
    }

    /// Start a new cycle under a freshly drawn name
    async fn reset(&self, state: &mut FileState) {
        state.pending.clear();
        state.accepted = 0;
        state.flushed = 0;
        state.failure = None;
        state.target = self.names.next_name();

        let temp = state.temp();
        state.file = match File::create(&temp).await {
            Ok(file) => Some(file),
            Err(e) => {
                error!(
                    "Failed to open temporary file {}: {}; retrying on next batch",
                    temp.display(),
                    e
                );
                None
            }
        };
    }
}

#[async_trait::async_trait]
impl OutputBuffer for FileBuffer {
    async fn write_line(&self, line: String) -> BufferResult<()> {
        let mut state = self.state.lock().await;
        state.pending.push(line);
        state.accepted += 1;

        if state.failure.is_none() && state.pending.len() >= self.batch_size {
            if let Err(source) = state.append_pending().await {
                state.failure = Some(source.to_string());
                return Err(BufferError::Write {
                    path: state.temp(),
                    source,
                });
            }
        }
        Ok(())
    }

    async fn commit(&self) -> BufferResult<Option<PathBuf>> {
        let mut state = self.state.lock().await;
        if state.failure.is_none() {
            if let Err(e) = state.append_pending().await {
                state.failure = Some(e.to_string());
            }
        }

        // Close before rename or removal.
        state.file = None;
        let temp = state.temp();
        let target = state.target.clone();

        let outcome = if let Some(reason) = state.failure.take() {
            Err(BufferError::Aborted {
                temp,
                target,
                reason,
                lines: std::mem::take(&mut state.pending),
            })
        } else if state.accepted == 0 {
            match fs::remove_file(&temp).await {
                Ok(()) => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(BufferError::Discard { path: temp, source }),
            }
        } else {
            match fs::rename(&temp, &target).await {
                Ok(()) => {
                    info!("{} lines written to file {}", state.accepted, target.display());
                    Ok(Some(target))
                }
                Err(source) => Err(BufferError::Finalize {
                    temp,
                    target,
                    source,
                }),
            }
        };

        self.reset(&mut state).await;
        outcome
    }

    async fn pending(&self) -> usize {
        self.state.lock().await.accepted
    }

    async fn close(&self) -> BufferResult<()> {
        let mut state = self.state.lock().await;
        if state.accepted > 0 {
            let temp = state.temp();
            warn!(
                "Closing with {} uncommitted lines, kept in {}",
                state.accepted,
                temp.display()
            );
            if state.failure.is_none() {
                state
                    .append_pending()
                    .await
                    .map_err(|source| BufferError::Write { path: temp, source })?;
            }
            state.file = None;
            return Ok(());
        }

        state.file = None;
        let temp = state.temp();
        match fs::remove_file(&temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BufferError::Discard { path: temp, source }),
        }
    }

    fn name(&self) -> &str {
        "Disc file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::test_support::*;

    #[tokio::test]
    async fn test_batches_reach_disk_before_commit() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FileBuffer::with_batch_size(numbered_names(dir.path()), 2)
            .await
            .unwrap();
        let temp = dir.path().join("out-0.txt.tmp");
        let target = dir.path().join("out-0.txt");

        for i in 0..5 {
            buffer.write_line(format!("l{}", i)).await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&temp).unwrap(), "l0\nl1\nl2\nl3");
        assert!(!target.exists());
        assert_eq!(buffer.pending().await, 5);

        let path = buffer.commit().await.unwrap().unwrap();
        assert_eq!(path, target);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "l0\nl1\nl2\nl3\nl4");
        assert!(!temp.exists());
        assert!(dir.path().join("out-1.txt.tmp").exists());
        assert_eq!(buffer.pending().await, 0);
    }

    #[tokio::test]
    async fn test_scenario_three_lines_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FileBuffer::new(numbered_names(dir.path())).await.unwrap();

        for line in ["a", "b", "c"] {
            buffer.write_line(line.to_string()).await.unwrap();
        }
        let path = buffer.commit().await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a\nb\nc");
    }

    #[tokio::test]
    async fn test_empty_commit_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FileBuffer::new(numbered_names(dir.path())).await.unwrap();
        assert!(dir.path().join("out-0.txt.tmp").exists());

        assert!(buffer.commit().await.unwrap().is_none());
        assert!(!dir.path().join("out-0.txt.tmp").exists());
        assert!(!dir.path().join("out-0.txt").exists());
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_close_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FileBuffer::new(numbered_names(dir.path())).await.unwrap();

        buffer.write_line("only".to_string()).await.unwrap();
        buffer.commit().await.unwrap().unwrap();
        buffer.close().await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = FileBuffer::new(numbered_names(&missing)).await;
        assert!(matches!(result, Err(BufferError::Open { .. })));
    }

    #[tokio::test]
    async fn test_reopens_temp_file_after_directory_returns() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let buffer = FileBuffer::new(numbered_names(&out)).await.unwrap();

        buffer.write_line("kept".to_string()).await.unwrap();
        std::fs::remove_dir_all(&out).unwrap();
        let err = buffer.commit().await.unwrap_err();
        assert!(matches!(err, BufferError::Aborted { .. } | BufferError::Finalize { .. }));

        std::fs::create_dir(&out).unwrap();
        buffer.write_line("again".to_string()).await.unwrap();
        let path = buffer.commit().await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "again");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_failure_aborts_cycle() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let crash = dir.path().join("crash.txt");
        // Every write to /dev/full fails with ENOSPC.
        std::os::unix::fs::symlink("/dev/full", temp_path(&crash)).unwrap();

        let good = dir.path().to_path_buf();
        let first = crash.clone();
        let calls = AtomicUsize::new(0);
        let names = Arc::new(move || match calls.fetch_add(1, Ordering::SeqCst) {
            0 => first.clone(),
            n => good.join(format!("ok-{}.txt", n)),
        });
        let buffer = FileBuffer::with_batch_size(names, 2).await.unwrap();

        buffer.write_line("a".to_string()).await.unwrap();
        let err = buffer.write_line("b".to_string()).await.unwrap_err();
        assert!(matches!(err, BufferError::Write { .. }));
        buffer.write_line("c".to_string()).await.unwrap();

        let err = buffer.commit().await.unwrap_err();
        assert!(matches!(err, BufferError::Aborted { .. }));
        assert_eq!(err.unsaved_lines(), ["a", "b", "c"]);
        assert!(!crash.exists());

        buffer.write_line("d".to_string()).await.unwrap();
        let path = buffer.commit().await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("ok-1.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "d");
    }
}
