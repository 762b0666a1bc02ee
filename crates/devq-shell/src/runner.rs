//! The command runner abstraction and its streaming output handle.

use std::fmt;

use devq_core::DeviceId;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::ShellError;

/// A command addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    /// A line run by the device shell (`adb -s <id> shell <line>`).
    ///
    /// The line is sent verbatim, so arguments must already be escaped.
    Shell { line: String },
    /// A direct invocation of the control binary (`adb -s <id> <args>`).
    Adb { args: Vec<String> },
}

impl CommandRequest {
    /// Create a device shell command.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell { line: line.into() }
    }

    /// Create a control binary command.
    pub fn adb<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Adb {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments passed to the control binary after `-s <id>`.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Shell { line } => vec!["shell".to_string(), line.clone()],
            Self::Adb { args } => args.clone(),
        }
    }

    /// Name of the device tool a shell command starts with.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::Shell { line } => line.split_whitespace().next(),
            Self::Adb { .. } => None,
        }
    }

    /// The same shell command routed through `busybox`.
    pub fn with_busybox(&self) -> Option<Self> {
        match self {
            Self::Shell { line } if !line.starts_with("busybox ") => {
                Some(Self::shell(format!("busybox {line}")))
            }
            _ => None,
        }
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell { line } => write!(f, "shell {line}"),
            Self::Adb { args } => f.write_str(&args.join(" ")),
        }
    }
}

/// How a command ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Everything the process wrote to stderr.
    pub stderr: String,
    /// Whether the command was stopped through its cancellation token.
    pub canceled: bool,
}

impl ExitOutcome {
    /// Whether the command exited normally with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.canceled
    }
}

/// Collected output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout lines joined with `\n`.
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub canceled: bool,
}

impl CommandOutput {
    /// Whether the command exited normally with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.canceled
    }

    /// Stdout split into non-empty lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().filter(|l| !l.trim().is_empty())
    }

    /// Whether the device reported the shell tool as missing.
    pub fn tool_missing(&self, tool: &str) -> bool {
        let marker = format!("{tool}: not found");
        self.stdout.trim_end().ends_with(&marker) || self.stderr.trim_end().ends_with(&marker)
    }
}

/// Output of a running command: its stdout lines as they arrive, then its
/// exit outcome.
#[derive(Debug)]
pub struct CommandStream {
    lines: mpsc::Receiver<String>,
    exit: oneshot::Receiver<Result<ExitOutcome, ShellError>>,
}

impl CommandStream {
    /// Create a stream from its two halves.
    pub fn new(
        lines: mpsc::Receiver<String>,
        exit: oneshot::Receiver<Result<ExitOutcome, ShellError>>,
    ) -> Self {
        Self { lines, exit }
    }

    /// A stream that ends immediately with `error`.
    pub fn failed(error: ShellError) -> Self {
        let (_, lines) = mpsc::channel(1);
        let (tx, exit) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { lines, exit }
    }

    /// Next stdout line, or `None` once stdout is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the exit outcome. Unread stdout lines are discarded.
    pub async fn finish(self) -> Result<ExitOutcome, ShellError> {
        drop(self.lines);
        self.exit.await.map_err(|_| ShellError::Disconnected)?
    }

    /// Read all remaining output and wait for the exit outcome.
    pub async fn collect(mut self) -> Result<CommandOutput, ShellError> {
        let mut stdout = Vec::new();
        while let Some(line) = self.next_line().await {
            stdout.push(line);
        }
        let outcome = self.finish().await?;
        Ok(CommandOutput {
            stdout: stdout.join("\n"),
            stderr: outcome.stderr,
            code: outcome.code,
            canceled: outcome.canceled,
        })
    }
}

/// Runs commands against devices.
///
/// Implementations start the command immediately and report through the
/// returned stream. Cancelling `cancel` must stop the command; the stream's
/// exit outcome is only reported after the process is gone.
pub trait CommandRunner: Send + Sync + 'static {
    fn spawn(
        &self,
        device: &DeviceId,
        request: CommandRequest,
        cancel: CancellationToken,
    ) -> CommandStream;
}

/// Run a one-shot command to completion.
///
/// When `busybox_fallback` is set and the device reports the shell tool as
/// missing, the command is retried once through `busybox`.
pub async fn run_shell(
    runner: &dyn CommandRunner,
    device: &DeviceId,
    request: CommandRequest,
    cancel: CancellationToken,
    busybox_fallback: bool,
) -> Result<CommandOutput, ShellError> {
    let output = runner
        .spawn(device, request.clone(), cancel.clone())
        .collect()
        .await?;

    if !busybox_fallback || output.canceled {
        return Ok(output);
    }

    match (request.tool(), request.with_busybox()) {
        (Some(tool), Some(retry)) if output.tool_missing(tool) => {
            tracing::debug!(target: "devq::runner", %device, tool, "tool missing, retrying through busybox");
            runner.spawn(device, retry, cancel).collect().await
        }
        _ => Ok(output),
    }
}
