//! Subprocess runner for the `adb` control binary.

use std::process::Stdio;
use std::time::Duration;

use devq_core::{DeviceId, EngineConfig};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::runner::{CommandRequest, CommandRunner, CommandStream, ExitOutcome};
use crate::{LINE_CHANNEL_SIZE, ShellError};

/// Runs commands by launching `adb -s <device> ...`.
#[derive(Debug, Clone)]
pub struct AdbRunner {
    adb_path: String,
    grace: Duration,
}

impl AdbRunner {
    /// Create a runner for the configured `adb` executable.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            grace: config.cancel_grace(),
        }
    }

    /// Create a runner for an explicit executable and grace period.
    pub fn with_program(program: impl Into<String>, grace: Duration) -> Self {
        Self {
            adb_path: program.into(),
            grace,
        }
    }
}

impl CommandRunner for AdbRunner {
    fn spawn(
        &self,
        device: &DeviceId,
        request: CommandRequest,
        cancel: CancellationToken,
    ) -> CommandStream {
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_SIZE);
        let (exit_tx, exit_rx) = oneshot::channel();

        let mut command = Command::new(&self.adb_path);
        command
            .arg("-s")
            .arg(device.as_str())
            .args(request.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(target: "devq::runner", %device, command = %request, "spawning");

        let program = self.adb_path.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            let result = drive(command, &program, line_tx, cancel, grace).await;
            if let Err(ref e) = result {
                error!(target: "devq::runner", error = %e, "command failed");
            }
            let _ = exit_tx.send(result);
        });

        CommandStream::new(line_rx, exit_rx)
    }
}

async fn drive(
    mut command: Command,
    program: &str,
    lines: mpsc::Sender<String>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<ExitOutcome, ShellError> {
    let mut child = command
        .spawn()
        .map_err(|e| ShellError::launch(program, e))?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            forward_lines(stdout, lines).await;
        }
    });
    let stderr_task = tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let mut bytes = Vec::new();
            let _ = stderr.read_to_end(&mut bytes).await;
            text = String::from_utf8_lossy(&bytes).into_owned();
        }
        text
    });

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let (status, canceled) = match waited {
        Some(status) => (status.map_err(ShellError::io)?, false),
        None => (terminate(&mut child, stdin, grace).await?, true),
    };

    if tokio::time::timeout(grace, stdout_task).await.is_err() {
        warn!(target: "devq::runner", "stdout still open after exit, dropping remaining output");
    }
    let stderr = match tokio::time::timeout(grace, stderr_task).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    };

    Ok(ExitOutcome {
        code: status.code(),
        stderr,
        canceled,
    })
}

/// Ask the process to stop, then kill it once the grace period runs out.
async fn terminate(
    child: &mut Child,
    stdin: Option<tokio::process::ChildStdin>,
    grace: Duration,
) -> Result<std::process::ExitStatus, ShellError> {
    drop(stdin);
    interrupt(child).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(ShellError::io),
        Err(_) => {
            warn!(target: "devq::runner", grace_ms = grace.as_millis() as u64, "command ignored interrupt, killing");
            child.kill().await.map_err(ShellError::io)?;
            child.wait().await.map_err(ShellError::io)
        }
    }
}

#[cfg(unix)]
async fn interrupt(child: &Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .arg("-INT")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}

#[cfg(not(unix))]
async fn interrupt(_child: &Child) {}

/// Forward output lines split on `\r` or `\n`, skipping blank ones.
///
/// Output keeps being drained after the receiver is dropped so the process
/// never blocks on a full pipe.
async fn forward_lines<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, &tx).await;
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, &tx).await;
}

async fn flush_line(pending: &mut Vec<u8>, tx: &mpsc::Sender<String>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    if !line.trim().is_empty() && !tx.is_closed() {
        let _ = tx.send(line).await;
    }
}
