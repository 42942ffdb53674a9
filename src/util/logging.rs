use env_logger::{Builder, Target};
use log::{LevelFilter, debug};
use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use std::io::{self, Write};
use std::path::Path;

use crate::config::LogLevel;

/// Name of the monitor's own log file inside `log_dir`
pub const LOG_FILE_NAME: &str = "process_out_monitor.log";

/// Size at which the log file is rotated
pub const LOG_MAX_BYTES: u64 = 20 * 1024 * 1024;

/// Rotated log files kept next to the live one
pub const LOG_BACKUPS: usize = 20;

impl From<&LogLevel> for LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Open `path` for appending, rotating it once it reaches `max_bytes`
/// and keeping at most `backups` old files
pub fn rotating_writer(
    path: &Path,
    max_bytes: u64,
    backups: usize,
) -> io::Result<BasicRollingFileAppender> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    BasicRollingFileAppender::new(path, RollingConditionBasic::new().max_size(max_bytes), backups)
}

/// Initialize the logging system.
///
/// Records go to `log_file` when one is given, rotated every
/// [`LOG_MAX_BYTES`] with [`LOG_BACKUPS`] old files kept; otherwise to stderr.
pub fn init(level: &LogLevel, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level.into());

    if let Some(path) = log_file {
        let writer = rotating_writer(path, LOG_MAX_BYTES, LOG_BACKUPS)?;
        builder.target(Target::Pipe(Box::new(writer)));
    }

    if let Err(e) = builder.try_init() {
        debug!("Keeping the logger already installed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(LevelFilter::from(&LogLevel::Error), LevelFilter::Error);
        assert_eq!(LevelFilter::from(&LogLevel::Trace), LevelFilter::Trace);
    }

    #[test]
    fn test_writer_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join(LOG_FILE_NAME);

        let mut writer = rotating_writer(&path, LOG_MAX_BYTES, LOG_BACKUPS).unwrap();
        writer.write_all(b"started\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "started\n");
    }

    #[test]
    fn test_writer_rotates_at_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);

        let mut writer = rotating_writer(&path, 16, 2).unwrap();
        writer.write_all(b"first record, long\n").unwrap();
        writer.write_all(b"second\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(log_files(dir.path()).len(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[test]
    fn test_writer_keeps_bounded_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);

        let mut writer = rotating_writer(&path, 4, 2).unwrap();
        for i in 0..6 {
            writer.write_all(format!("record {}\n", i).as_bytes()).unwrap();
        }
        writer.flush().unwrap();

        // The live file plus two backups.
        assert_eq!(log_files(dir.path()).len(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "record 5\n");
    }
}
