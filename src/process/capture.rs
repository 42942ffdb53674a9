//! Line capture from process output

use std::io;

use log::{debug, error, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::mpsc;

use super::{ProcessError, ProcessResult};

/// Read errors in a row after which the stream is treated as unusable
pub const MAX_CONSECUTIVE_ERRORS: usize = 3;

/// Reads newline-terminated lines, tolerating invalid UTF-8 and overlong lines
pub struct LineReader<R> {
    reader: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
    /// Tail of the previous chunk that belongs to the next one
    carry: Vec<u8>,
    split: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Create a line reader; lines longer than `max_line_bytes` are split
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes: max_line_bytes.max(1),
            buf: Vec::new(),
            carry: Vec::new(),
            split: false,
        }
    }

    /// Next line without its terminator, or `None` at end of input.
    ///
    /// Pieces of a split line never cut through a UTF-8 sequence or a
    /// `\r\n` pair, so a piece may exceed the limit by up to three bytes.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            self.buf.append(&mut self.carry);
            let limit = self.max_line_bytes as u64;
            let n = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 {
                self.split = false;
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
            }

            let terminated = self.buf.last() == Some(&b'\n');
            let continues = !terminated && n == self.max_line_bytes;
            if terminated {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
            } else if continues {
                let keep = self.buf.len() - held_back(&self.buf);
                self.carry.extend_from_slice(&self.buf[keep..]);
                self.buf.truncate(keep);
            }

            let was_split = std::mem::replace(&mut self.split, continues);
            // Nothing complete yet, or the terminator of a line that ended at the limit.
            if self.buf.is_empty() && (continues || (was_split && terminated)) {
                continue;
            }
            if continues {
                warn!("Line longer than {} bytes, splitting", self.max_line_bytes);
            }

            return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
        }
    }
}

/// Bytes at the end of a split piece that must move to the next piece:
/// a `\r` that may open a `\r\n`, or an incomplete UTF-8 sequence
fn held_back(chunk: &[u8]) -> usize {
    if chunk.last() == Some(&b'\r') {
        return 1;
    }

    let start = chunk.len().saturating_sub(3);
    for (i, &byte) in chunk.iter().enumerate().skip(start).rev() {
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        let have = chunk.len() - i;
        return if have < width { have } else { 0 };
    }
    0
}

/// Forward every line of `lines` into `tx` until end of input.
///
/// Read errors are logged and skipped; the stream is abandoned after
/// [`MAX_CONSECUTIVE_ERRORS`] failures in a row. Returns the number of
/// lines forwarded.
pub async fn capture_lines<R: AsyncBufRead + Unpin>(
    mut lines: LineReader<R>,
    tx: mpsc::Sender<String>,
) -> ProcessResult<usize> {
    let mut captured = 0;
    let mut errors = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                errors = 0;
                tx.send(line).await?;
                captured += 1;
            }
            Ok(None) => break,
            Err(e) => {
                errors += 1;
                error!("Error reading process output: {}", e);
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    return Err(ProcessError::StreamUnusable(errors));
                }
            }
        }
    }

    debug!("Process output closed after {} lines", captured);
    Ok(captured)
}
