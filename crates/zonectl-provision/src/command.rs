// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running external tools with cancellation.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zonectl_core::ZonectlError;

/// Run `program` with `args` and return its stdout.
///
/// The child is killed if `cancel` fires first. A non-zero exit is reported
/// with the command line and the tool's stderr.
pub async fn run_command(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
) -> Result<String, ZonectlError> {
    let command_line = format!("{program} {}", args.join(" "));
    debug!(command = %command_line, "running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ZonectlError::Provision(format!("failed to run `{command_line}`: {e}")))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output
            .map_err(|e| ZonectlError::Provision(format!("failed to run `{command_line}`: {e}")))?,
        _ = cancel.cancelled() => {
            debug!(command = %command_line, "command cancelled");
            return Err(ZonectlError::Cancelled);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ZonectlError::Provision(format!(
            "`{command_line}` failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn returns_stdout() {
        let out = run_command("/bin/sh", &args(&["-c", "echo spire"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.trim(), "spire");
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let err = run_command(
            "/bin/sh",
            &args(&["-c", "echo 'release not found' >&2; exit 1"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("release not found"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = run_command("/bin/sh", &args(&["-c", "sleep 30"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ZonectlError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
