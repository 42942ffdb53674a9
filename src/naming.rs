//! Output file naming
//!
//! Committed files are named by rendering a pattern such as
//! `app_{{.Timestamp}}.log` with the current time and placing the result
//! under the output directory.

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};

static TIMESTAMP_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?[Tt]imestamp\s*\}\}").expect("timestamp pattern is valid")
});

/// Produces a fresh output path on every call
pub trait NameGenerator: Send + Sync + 'static {
    /// Draw the next unused output path
    fn next_name(&self) -> PathBuf;
}

impl<F> NameGenerator for F
where
    F: Fn() -> PathBuf + Send + Sync + 'static,
{
    fn next_name(&self) -> PathBuf {
        self()
    }
}

/// Whether `pattern` contains the timestamp substitution variable
pub fn has_timestamp_placeholder(pattern: &str) -> bool {
    TIMESTAMP_VAR.is_match(pattern)
}

/// Format a timestamp the way it appears in file names: seconds, then the
/// nine-digit nanosecond fraction.
pub fn format_timestamp(time: &DateTime<Local>) -> String {
    format!(
        "{}{:09}",
        time.format("%Y%m%d%H%M%S"),
        time.timestamp_subsec_nanos()
    )
}

/// Name generator rendering a filename pattern under an output directory
pub struct TemplateNameGenerator {
    out_dir: PathBuf,
    pattern: String,
    last_nanos: AtomicI64,
}

impl TemplateNameGenerator {
    /// Create a generator for `pattern` under `out_dir`
    pub fn new(out_dir: impl AsRef<Path>, pattern: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.as_ref().to_path_buf(),
            pattern: pattern.into(),
            last_nanos: AtomicI64::new(i64::MIN),
        }
    }

    /// Render the pattern for a given timestamp
    pub fn render(&self, time: &DateTime<Local>) -> PathBuf {
        let timestamp = format_timestamp(time);
        let name = TIMESTAMP_VAR.replace_all(&self.pattern, timestamp.as_str());
        self.out_dir.join(name.as_ref())
    }

    // Strictly increasing across calls, even when the clock is coarse or steps back.
    fn unique_now(&self) -> DateTime<Local> {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
        let mut last = self.last_nanos.load(Ordering::Relaxed);
        loop {
            let next = if now > last { now } else { last + 1 };
            match self.last_nanos.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return DateTime::<Utc>::from_timestamp_nanos(next).with_timezone(&Local),
                Err(current) => last = current,
            }
        }
    }
}

impl NameGenerator for TemplateNameGenerator {
    fn next_name(&self) -> PathBuf {
        self.render(&self.unique_now())
    }
}
