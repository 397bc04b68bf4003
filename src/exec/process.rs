// src/exec/process.rs

//! Shell process helpers shared by the compute engine, source-count probes
//! and the command notifier.

use std::process::{ExitStatus, Stdio};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Build a shell command appropriate for the platform.
pub fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// Exit code of a finished process.
///
/// A process killed by a signal reports `128 + signal`, the way shells do
/// (SIGTERM -> 143), so an externally killed compute step is still a
/// non-zero failure with a meaningful code.
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Run `cmd` to completion, forwarding stdout at info and stderr at debug.
///
/// Returns the exit code; only spawn/wait failures are errors.
pub async fn run_streaming(label: &str, mut cmd: Command) -> Result<i32> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for '{label}'"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut forwarders = Vec::new();
    if let Some(stdout) = stdout {
        let label = label.to_string();
        forwarders.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(job = %label, "stdout: {}", line);
            }
        }));
    }
    // Always consume stderr so buffers don't fill.
    if let Some(stderr) = stderr {
        let label = label.to_string();
        forwarders.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %label, "stderr: {}", line);
            }
        }));
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of '{label}'"))?;

    for handle in forwarders {
        let _ = handle.await;
    }

    Ok(exit_code_of(&status))
}

/// Run `cmd` and return its trimmed stdout. A non-zero exit is an error.
pub async fn capture_stdout(label: &str, mut cmd: Command) -> Result<String> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .with_context(|| format!("running '{label}'"))?;

    let code = exit_code_of(&output.status);
    if code != 0 {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("'{label}' exited with code {code}: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
