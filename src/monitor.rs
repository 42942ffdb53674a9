//! Supervision of the monitored process
//!
//! Wires the child's stdout through the buffer to committed files, and
//! drains everything once the child exits: one final commit, then a wait
//! for every queued post-processing run to finish.

use anyhow::Context;
use log::{debug, error, info, warn};
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;

use crate::buffer::{OutputBuffer, create_buffer};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::naming::{NameGenerator, TemplateNameGenerator};
use crate::pipeline::{FlushScheduler, dispatch_queue, relay_lines};
use crate::process::{Command, LineReader, ProcessError, ProcessHandle, capture_lines, log_stderr};

/// Lines in flight between capture and the buffer
const LINE_CHANNEL_CAPACITY: usize = 100;

/// How long an interrupted child gets to exit before it is killed
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Runs a command and turns its output into committed, post-processed files
pub struct Monitor {
    config: MonitorConfig,
    buffer: Arc<dyn OutputBuffer>,
}

impl Monitor {
    /// Prepare the output directory and buffer.
    ///
    /// Errors here are fatal: nothing can be captured without storage.
    pub async fn new(config: MonitorConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.out_dir)
            .await
            .with_context(|| format!("Cannot create output directory {}", config.out_dir.display()))?;

        let names: Arc<dyn NameGenerator> =
            Arc::new(TemplateNameGenerator::new(&config.out_dir, config.out_name.clone()));
        let buffer = create_buffer(config.buffer, names, config.batch_size)
            .await
            .context("Cannot create initial buffer storage")?;

        Ok(Self { config, buffer })
    }

    /// The buffer captured lines are written to
    pub fn buffer(&self) -> &Arc<dyn OutputBuffer> {
        &self.buffer
    }

    /// The monitored command
    pub fn command(&self) -> Command {
        Command::new(&self.config.command).args(&self.config.command_args)
    }

    /// The post-processing command, without the file argument
    pub fn post_processor(&self) -> Option<Command> {
        self.config
            .out_process_script
            .as_ref()
            .filter(|script| !script.trim().is_empty())
            .map(|script| Command::new(script).args(&self.config.out_process_script_params))
    }

    fn log_settings(&self) {
        info!("Run and monitor command: {}", self.command().command_line());
        info!("Write interval: {} seconds", self.config.write_interval);
        info!("Output dir: {}", self.config.out_dir.display());
        match self.config.log_file() {
            Some(path) => info!("Log file: {}", path.display()),
            None => info!("Log file: stderr"),
        }
        match self.post_processor() {
            Some(post) => info!("Out process script: {}", post.command_line()),
            None => info!("Out process script: none"),
        }
        info!("Context: {}", self.buffer.name());
    }

    /// Run the command until it exits, then drain the pipeline.
    ///
    /// Returns the command's exit status. Only failing to start the command
    /// is an error; everything after that is logged and the drain always runs.
    /// Ctrl-C gives the command five seconds to exit before it is killed.
    pub async fn run(self) -> Result<ExitStatus> {
        self.run_until(tokio::signal::ctrl_c(), INTERRUPT_GRACE).await
    }

    /// Like [`run`](Self::run), with `interrupt` standing in for Ctrl-C and
    /// `grace` for the time the command gets to exit once it fires
    pub async fn run_until<F>(self, interrupt: F, grace: Duration) -> Result<ExitStatus>
    where
        F: Future<Output = io::Result<()>>,
    {
        self.log_settings();

        let mut child = self
            .command()
            .capture_stdout(true)
            .capture_stderr(true)
            .spawn()
            .with_context(|| format!("Error starting command: {}", self.command().command_line()))?;
        let program = child.program().to_string();
        if let Some(pid) = child.pid() {
            info!("Process PID: {}", pid);
        }

        let stdout = child.take_stdout()?;
        let stderr = child.take_stderr()?;

        let (line_tx, line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        let lines = LineReader::new(BufReader::new(stdout), self.config.max_line_bytes);
        let capture = tokio::spawn(capture_lines(lines, line_tx));
        let relay = tokio::spawn(relay_lines(line_rx, Arc::clone(&self.buffer)));
        let stderr_task = tokio::spawn(log_stderr(program.clone(), stderr));

        let (queue, dispatcher) = dispatch_queue(self.config.dispatch_queue, self.post_processor());
        let dispatch = tokio::spawn(dispatcher.run());

        let (stop, shutdown) = watch::channel(false);
        let scheduler = FlushScheduler::new(
            Arc::clone(&self.buffer),
            Duration::from_secs(self.config.write_interval),
            queue.clone(),
        );
        let scheduler = tokio::spawn(scheduler.run(shutdown));

        let status = wait_for_exit(&mut child, interrupt, grace).await;

        // Everything the child wrote must be in the buffer before the final commit.
        match joined("capture", capture.await) {
            Some(Ok(count)) => debug!("Captured {} lines from {}", count, program),
            Some(Err(e)) => error!("Capture of {} output stopped: {}", program, e),
            None => {}
        }
        if let Some(count) = joined("relay", relay.await) {
            debug!("Buffered {} lines", count);
        }
        if let Some(Err(e)) = joined("stderr", stderr_task.await) {
            warn!("Error reading stderr of {}: {}", program, e);
        }

        if stop.send(true).is_err() {
            debug!("Flush scheduler already stopped");
        }
        joined("scheduler", scheduler.await);

        let file = match self.buffer.commit().await {
            Ok(file) => file,
            Err(e) => {
                error!("Final commit failed: {}", e);
                None
            }
        };
        if let Err(e) = self.buffer.close().await {
            error!("Error closing buffer: {}", e);
        }
        // Submitted even when empty so the in-flight count balances.
        queue.submit(file).await;
        queue.drain().await;
        drop(queue);
        if let Some(count) = joined("dispatcher", dispatch.await) {
            info!("{} files handed to post-processing", count);
        }

        let status = status?;
        if status.success() {
            info!("Command {} finished", program);
        } else {
            error!("Error for command {}: {}", program, status);
        }
        Ok(status)
    }
}

/// Wait for the child; once `interrupt` fires give it `grace` to exit, then kill it
async fn wait_for_exit<F>(
    child: &mut ProcessHandle,
    interrupt: F,
    grace: Duration,
) -> std::result::Result<ExitStatus, ProcessError>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        status = child.wait() => status,
        signal = interrupt => {
            if let Err(e) = signal {
                error!("Cannot listen for interrupts: {}", e);
                return child.wait().await;
            }
            warn!("Interrupted, waiting up to {:?} for {} to exit", grace, child.program());
            match child.wait_with_timeout(grace).await {
                Err(ProcessError::Timeout(_)) => {
                    warn!("Killing {}", child.program());
                    child.kill().await?;
                    child.wait().await
                }
                other => other,
            }
        }
    }
}

fn joined<T>(task: &str, result: std::result::Result<T, JoinError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("{} task failed: {}", task, e);
            None
        }
    }
}
