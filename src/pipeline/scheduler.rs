use log::{debug, error, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::DispatchQueue;
use crate::buffer::OutputBuffer;

/// Commits the buffer at a fixed interval and queues the results for dispatch
pub struct FlushScheduler {
    buffer: Arc<dyn OutputBuffer>,
    interval: Duration,
    queue: DispatchQueue,
}

impl FlushScheduler {
    /// Create a scheduler committing `buffer` every `interval`
    pub fn new(buffer: Arc<dyn OutputBuffer>, interval: Duration, queue: DispatchQueue) -> Self {
        Self {
            buffer,
            interval,
            queue,
        }
    }

    /// Commit on every tick until `shutdown` changes or its sender is dropped.
    ///
    /// The first tick fires one interval after start. A failed commit is
    /// logged and not retried; the next tick picks up whatever accumulated.
    /// Returns the number of files queued.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut timer = time::interval_at(Instant::now() + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut queued = 0;

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.buffer.commit().await {
                Ok(Some(file)) => {
                    self.queue.submit(Some(file)).await;
                    queued += 1;
                }
                Ok(None) => trace!("Nothing to commit"),
                Err(e) => error!("Commit failed: {}", e),
            }
        }

        debug!("Flush scheduler stopped after {} commits", queued);
        queued
    }
}
