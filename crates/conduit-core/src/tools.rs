//! Running the engine's command-line tools (`initdb`, `pg_dump`,
//! `pg_restore`).

use std::path::Path;
use std::process::Stdio;

use log::debug;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ConduitError, FsResultExt, Result};

/// Runs `program` with `args` and returns its stdout.
///
/// The child is killed when `cancel` fires, since the pending future and the
/// child handle are dropped together.
///
/// # Errors
///
/// Returns `ConduitError::ExternalTool` with the captured stderr when the
/// tool exits unsuccessfully, and `ConduitError::Timeout` on cancellation.
pub async fn run_tool(program: &Path, args: &[String], cancel: &CancellationToken) -> Result<String> {
    let tool = program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    debug!("running {tool} {args:?}");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .fs_context(program)?;

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(ConduitError::timeout(format!("running {tool}"))),
        output = child.wait_with_output() => output.fs_context(program)?,
    };

    if !output.status.success() {
        return Err(ConduitError::ExternalTool {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = run_tool(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo hello".to_string()],
            &CancellationToken::new(),
        )
        .await
        .expect("sh runs");
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let err = run_tool(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo broken >&2; exit 3".to_string()],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            ConduitError::ExternalTool { tool, stderr, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_kills_tool() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = run_tool(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConduitError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
