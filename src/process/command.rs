use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command as TokioCommand};
use tokio::time::timeout;

use super::{ProcessError, ProcessResult};

/// Command wrapper for process execution
#[derive(Debug, Clone)]
pub struct Command {
    /// Program to execute
    program: String,

    /// Arguments to pass to the program
    args: Vec<String>,

    /// Whether to capture stdout
    capture_stdout: bool,

    /// Whether to capture stderr
    capture_stderr: bool,
}

impl Command {
    /// Create a new command
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            capture_stdout: false,
            capture_stderr: false,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// Set whether to capture stdout
    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    /// Set whether to capture stderr
    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program and arguments joined by spaces, for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_tokio(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Start the command and return a handle to the process
    pub fn spawn(&self) -> ProcessResult<ProcessHandle> {
        debug!("Spawning command: {} {:?}", self.program, self.args);

        let mut cmd = self.to_tokio();
        cmd.stdin(Stdio::null());
        cmd.stdout(if self.capture_stdout { Stdio::piped() } else { Stdio::null() });
        cmd.stderr(if self.capture_stderr { Stdio::piped() } else { Stdio::null() });

        let child = cmd.spawn().map_err(|source| ProcessError::SpawnError {
            program: self.program.clone(),
            source,
        })?;

        Ok(ProcessHandle {
            child,
            program: self.program.clone(),
        })
    }

    /// Run the command to completion with no input, discarding stdout.
    ///
    /// Stderr is collected so failures can be reported.
    pub async fn run(&self) -> ProcessResult<Output> {
        trace!("Running command: {}", self.command_line());

        let mut cmd = self.to_tokio();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        cmd.output().await.map_err(|source| ProcessError::SpawnError {
            program: self.program.clone(),
            source,
        })
    }
}

/// Handle to a running process
pub struct ProcessHandle {
    /// Child process
    child: Child,

    /// Program name
    program: String,
}

impl ProcessHandle {
    /// OS process id, while the process is running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the captured stdout pipe
    pub fn take_stdout(&mut self) -> ProcessResult<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Other("Stdout not captured".to_string()))
    }

    /// Take the captured stderr pipe
    pub fn take_stderr(&mut self) -> ProcessResult<ChildStderr> {
        self.child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Other("Stderr not captured".to_string()))
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> ProcessResult<ExitStatus> {
        self.child.wait().await.map_err(ProcessError::WaitError)
    }

    /// Wait for the process to exit with a timeout
    pub async fn wait_with_timeout(&mut self, timeout_duration: Duration) -> ProcessResult<ExitStatus> {
        match timeout(timeout_duration, self.child.wait()).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(ProcessError::WaitError(e)),
            Err(_) => Err(ProcessError::Timeout(timeout_duration)),
        }
    }

    /// Kill the process
    pub async fn kill(&mut self) -> ProcessResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| ProcessError::ProcessKilled(format!("Failed to kill process: {}", e)))
    }
}

/// Read lines from a child's stderr and log them
pub async fn log_stderr(program: String, stderr: ChildStderr) -> ProcessResult<()> {
    let mut reader = BufReader::new(stderr).lines();
    while let Some(line) = reader.next_line().await.map_err(ProcessError::ReadError)? {
        warn!("[{}] stderr: {}", program, line);
    }
    Ok(())
}
