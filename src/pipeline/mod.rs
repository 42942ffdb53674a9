//! Moving lines into the buffer and committed files out to post-processing

mod dispatcher;
mod inflight;
mod scheduler;

use log::{debug, error};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use dispatcher::{DEFAULT_QUEUE_CAPACITY, DispatchQueue, Dispatcher, dispatch_queue};
pub use inflight::InFlight;
pub use scheduler::FlushScheduler;

use crate::buffer::OutputBuffer;

/// Write every line received on `rx` into `buffer`, in order, until the
/// sending side closes. Returns the number of lines relayed.
pub async fn relay_lines(mut rx: mpsc::Receiver<String>, buffer: Arc<dyn OutputBuffer>) -> usize {
    let mut relayed = 0;
    while let Some(line) = rx.recv().await {
        if let Err(e) = buffer.write_line(line).await {
            error!("Error buffering line: {}", e);
        }
        relayed += 1;
    }
    debug!("Relayed {} lines into {} buffer", relayed, buffer.name());
    relayed
}
