use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::InFlight;
use crate::error::MonitorError;
use crate::process::Command;

/// Default capacity of the committed-file queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Sending side of the dispatch queue.
///
/// Every submission, including `None` for an empty commit, is counted in
/// flight until the dispatcher has handled it.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Option<PathBuf>>,
    inflight: Arc<InFlight>,
}

impl DispatchQueue {
    /// Submit a commit result, waiting for queue space if the queue is full
    pub async fn submit(&self, file: Option<PathBuf>) {
        self.inflight.add();
        if let Err(e) = self.tx.send(file).await {
            self.inflight.done();
            error!("Dispatch queue closed, {:?} will not be post-processed", e.0);
        }
    }

    /// Wait until every submitted file has been handled
    pub async fn drain(&self) {
        self.inflight.wait().await;
    }

    /// Submissions not yet handled
    pub fn in_flight(&self) -> usize {
        self.inflight.count()
    }
}

/// Runs the post-processing command once per committed file
pub struct Dispatcher {
    rx: mpsc::Receiver<Option<PathBuf>>,
    post: Option<Command>,
    inflight: Arc<InFlight>,
}

/// Create a dispatch queue of `capacity` entries and the dispatcher consuming it.
///
/// Without a post-processing command committed files are only logged.
pub fn dispatch_queue(capacity: usize, post: Option<Command>) -> (DispatchQueue, Dispatcher) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let inflight = Arc::new(InFlight::new());
    let queue = DispatchQueue {
        tx,
        inflight: Arc::clone(&inflight),
    };
    (queue, Dispatcher { rx, post, inflight })
}

impl Dispatcher {
    /// Handle submissions until every queue handle is dropped.
    ///
    /// Returns the number of files dispatched.
    pub async fn run(mut self) -> usize {
        let mut dispatched = 0;
        while let Some(file) = self.rx.recv().await {
            if let Some(file) = file {
                if let Err(e) = self.dispatch(&file).await {
                    error!("Post-processing failed: {}", e);
                }
                dispatched += 1;
            }
            self.inflight.done();
        }
        debug!("Dispatcher stopped after {} files", dispatched);
        dispatched
    }

    async fn dispatch(&self, file: &Path) -> Result<(), MonitorError> {
        let Some(post) = &self.post else {
            info!("Committed {}", file.display());
            return Ok(());
        };

        let cmd = post.clone().arg(file.to_string_lossy());
        info!("Convert: {}", cmd.command_line());

        let output = cmd
            .run()
            .await
            .map_err(|e| MonitorError::Dispatch(format!("{}: {}", cmd.command_line(), e)))?;
        if output.status.success() {
            return Ok(());
        }

        Err(MonitorError::Dispatch(format!(
            "{} exited with {}: {}",
            cmd.command_line(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recorder(log: &Path) -> Command {
        // $0 is the committed file appended as the final argument.
        Command::new("sh").args([
            "-c".to_string(),
            format!("echo \"$0\" >> {}", log.display()),
        ])
    }

    #[tokio::test]
    async fn test_runs_command_once_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let (queue, dispatcher) = dispatch_queue(DEFAULT_QUEUE_CAPACITY, Some(recorder(&log)));
        let task = tokio::spawn(dispatcher.run());

        queue.submit(Some(PathBuf::from("/out/one"))).await;
        queue.submit(None).await;
        queue.submit(Some(PathBuf::from("/out/two"))).await;
        tokio::time::timeout(Duration::from_secs(5), queue.drain())
            .await
            .unwrap();
        assert_eq!(queue.in_flight(), 0);

        drop(queue);
        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "/out/one\n/out/two\n");
    }

    #[tokio::test]
    async fn test_empty_commit_only_balances_counter() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let (queue, dispatcher) = dispatch_queue(1, Some(recorder(&log)));
        let task = tokio::spawn(dispatcher.run());

        queue.submit(None).await;
        queue.drain().await;
        drop(queue);

        assert_eq!(task.await.unwrap(), 0);
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_dispatch() {
        let (queue, dispatcher) = dispatch_queue(
            2,
            Some(Command::new("sh").args(["-c", "exit 1"])),
        );
        let task = tokio::spawn(dispatcher.run());

        queue.submit(Some(PathBuf::from("a"))).await;
        queue.submit(Some(PathBuf::from("b"))).await;
        queue.drain().await;
        drop(queue);
        assert_eq!(task.await.unwrap(), 2);

        let (queue, dispatcher) = dispatch_queue(2, Some(Command::new("/nonexistent/script")));
        let task = tokio::spawn(dispatcher.run());
        queue.submit(Some(PathBuf::from("c"))).await;
        queue.drain().await;
        drop(queue);
        assert_eq!(task.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_dispatcher_gone_does_not_hang() {
        let (queue, dispatcher) = dispatch_queue(1, None);
        drop(dispatcher);

        queue.submit(Some(PathBuf::from("orphan"))).await;
        tokio::time::timeout(Duration::from_secs(1), queue.drain())
            .await
            .unwrap();
    }
}
