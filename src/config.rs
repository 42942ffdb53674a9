use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};
use crate::naming;

/// Prefix for environment variables overriding file settings
pub const ENV_PREFIX: &str = "OUTMONITOR";

/// Monitor configuration, as read from the settings file
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Seconds between periodic commits
    #[serde(default = "default_write_interval")]
    pub write_interval: u64,
    /// Program to run and monitor
    pub command: String,
    /// Arguments for the monitored program
    #[serde(default)]
    pub command_args: Vec<String>,
    /// Directory receiving committed files
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Directory for the monitor's own log file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Pattern for committed file names
    #[serde(rename = "out_filename_pattern", default = "default_out_name")]
    pub out_name: String,
    /// Post-processing program run once per committed file
    #[serde(default)]
    pub out_process_script: Option<String>,
    /// Static arguments passed before the committed file path
    #[serde(default)]
    pub out_process_script_params: Vec<String>,
    /// Buffering strategy
    #[serde(rename = "context", default)]
    pub buffer: BufferKind,
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Lines held in memory before the file buffer appends them to disk
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Capacity of the committed-file dispatch queue
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
    /// Longest line captured in one piece; longer lines are split
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_write_interval() -> u64 {
    60
}

fn default_out_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_out_name() -> String {
    "{{.Timestamp}}.out".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_dispatch_queue() -> usize {
    10
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

impl MonitorConfig {
    /// Load configuration from a file, with environment overrides, and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: MonitorConfig = ConfigBuilder::new()
            .add_file(path)
            .add_env(ENV_PREFIX)
            .build()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings the pipeline cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.write_interval == 0 {
            return Err(config_error("write_interval must be greater than zero"));
        }
        if self.command.trim().is_empty() {
            return Err(config_error("command must not be empty"));
        }
        if !naming::has_timestamp_placeholder(&self.out_name) {
            return Err(config_error(format!(
                "out_filename_pattern {:?} has no {{{{.Timestamp}}}} placeholder",
                self.out_name
            )));
        }
        if self.batch_size == 0 {
            return Err(config_error("batch_size must be greater than zero"));
        }
        if self.dispatch_queue == 0 {
            return Err(config_error("dispatch_queue must be greater than zero"));
        }
        if self.max_line_bytes == 0 {
            return Err(config_error("max_line_bytes must be greater than zero"));
        }
        Ok(())
    }

    /// Path of the monitor's log file, when one is configured
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(crate::util::logging::LOG_FILE_NAME))
    }
}

fn config_error(msg: impl Into<String>) -> anyhow::Error {
    MonitorError::Config(msg.into()).into()
}

/// Buffering strategy for captured lines
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum BufferKind {
    /// Lines are batched into a temporary file on disk
    File,
    /// Lines are held in memory until commit
    #[default]
    Memory,
}

// Anything other than "file" selects the memory buffer.
impl From<String> for BufferKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "file" => BufferKind::File,
            _ => BufferKind::Memory,
        }
    }
}

impl From<BufferKind> for String {
    fn from(kind: BufferKind) -> Self {
        match kind {
            BufferKind::File => "file".to_string(),
            BufferKind::Memory => "memory".to_string(),
        }
    }
}

/// Logging level
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path; format taken from the extension
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
}

fn file_format(path: &Path) -> Result<config::FileFormat> {
    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            error!("Configuration file has no extension");
            return Err(config_error(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    match extension.as_str() {
        "toml" => Ok(config::FileFormat::Toml),
        "json" => Ok(config::FileFormat::Json),
        "yaml" | "yml" => Ok(config::FileFormat::Yaml),
        format => {
            error!("Unsupported configuration format: {}", format);
            Err(config_error(format!("Unsupported config format: {}", format)))
        }
    }
}

/// Load configuration from the given sources, later sources overriding earlier ones
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    error!("Configuration file {} does not exist", path.display());
                    return Err(config_error(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                let format = file_format(&path)?;
                debug!("Loading configuration from file: {}", path.display());
                builder = builder.add_source(config::File::from(path).format(format));
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .separator("__")
                        .try_parsing(true),
                );
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| config_error(format!("Failed to build configuration: {}", e)))?;

    let result = config
        .try_deserialize()
        .map_err(|e| config_error(format!("Failed to deserialize configuration: {}", e)))?;

    debug!("Configuration loaded successfully: {:?}", result);

    Ok(result)
}

/// Configuration builder
pub struct ConfigBuilder<T: for<'de> Deserialize<'de>> {
    sources: Vec<ConfigSource>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: for<'de> Deserialize<'de> + Debug> ConfigBuilder<T> {
    /// Create a new config builder
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Add a file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources.push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add environment variables
    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<T> {
        load_config::<T>(self.sources)
    }
}

impl<T: for<'de> Deserialize<'de> + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", body).unwrap();
        file
    }

    #[test]
    fn test_load_json_with_original_keys() {
        let file = write_config(
            ".json",
            r#"{
                "write_interval": 5,
                "command": "tail",
                "command_args": ["-f", "/var/log/syslog"],
                "out_dir": "/tmp/out",
                "log_dir": "/tmp/log",
                "out_filename_pattern": "syslog_{{.Timestamp}}.txt",
                "out_process_script": "gzip",
                "out_process_script_params": ["-9"],
                "context": "file"
            }"#,
        );

        let config = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.write_interval, 5);
        assert_eq!(config.command, "tail");
        assert_eq!(config.command_args, vec!["-f", "/var/log/syslog"]);
        assert_eq!(config.out_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.out_name, "syslog_{{.Timestamp}}.txt");
        assert_eq!(config.out_process_script.as_deref(), Some("gzip"));
        assert_eq!(config.out_process_script_params, vec!["-9"]);
        assert_eq!(config.buffer, BufferKind::File);
        assert_eq!(config.log_file(), Some(PathBuf::from("/tmp/log/process_out_monitor.log")));
    }

    #[test]
    fn test_defaults_apply() {
        let file = write_config(".toml", "command = \"cat\"\n");

        let config = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.write_interval, 60);
        assert_eq!(config.out_dir, PathBuf::from("."));
        assert_eq!(config.buffer, BufferKind::Memory);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.dispatch_queue, 10);
        assert!(config.out_process_script.is_none());
        assert!(config.log_file().is_none());
    }

    #[test]
    fn test_unknown_context_means_memory() {
        assert_eq!(BufferKind::from("file".to_string()), BufferKind::File);
        assert_eq!(BufferKind::from("mem".to_string()), BufferKind::Memory);
        assert_eq!(BufferKind::from(String::new()), BufferKind::Memory);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let file = write_config(".toml", "command = \"cat\"\nwrite_interval = 0\n");
        let err = MonitorConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("write_interval"));
    }

    #[test]
    fn test_pattern_without_timestamp_rejected() {
        let file = write_config(
            ".toml",
            "command = \"cat\"\nout_filename_pattern = \"fixed.txt\"\n",
        );
        assert!(MonitorConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(MonitorConfig::load("/nonexistent/outmonitor.json").is_err());

        let file = write_config(".ini", "command = cat\n");
        let err = MonitorConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported config format"));
    }

    #[test]
    fn test_later_sources_override() {
        let base = write_config(".toml", "command = \"first\"\nwrite_interval = 10\n");
        let local = write_config(".json", r#"{"command": "second"}"#);
        let config: MonitorConfig = ConfigBuilder::new()
            .add_file(base.path())
            .add_file(local.path())
            .build()
            .unwrap();

        assert_eq!(config.command, "second");
        assert_eq!(config.write_interval, 10);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(".toml", "command = \"cat\"\nwrite_interval = 10\n");
        // A prefix of its own keeps this test clear of the others.
        unsafe {
            std::env::set_var("OUTMONITOR_ENVTEST__WRITE_INTERVAL", "7");
            std::env::set_var("OUTMONITOR_ENVTEST__CONTEXT", "file");
        }

        let config: MonitorConfig = ConfigBuilder::new()
            .add_file(file.path())
            .add_env("OUTMONITOR_ENVTEST")
            .build()
            .unwrap();

        assert_eq!(config.command, "cat");
        assert_eq!(config.write_interval, 7);
        assert_eq!(config.buffer, BufferKind::File);
    }

    #[test]
    fn test_load_reads_outmonitor_variables() {
        let file = write_config(".json", r#"{"command": "cat"}"#);
        // No other test reads max_line_bytes.
        unsafe {
            std::env::set_var("OUTMONITOR__MAX_LINE_BYTES", "4096");
        }

        let config = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.max_line_bytes, 4096);
    }
}
