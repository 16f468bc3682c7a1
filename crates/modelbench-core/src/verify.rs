//! Verification command execution.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;

use crate::domain::VerificationResult;

/// Run one shell command in `dir` through `sh -c`.
///
/// Never fails: spawn errors and timeouts are reported on the result with
/// `passed = false`. A timed-out child is killed.
pub async fn run_command(command: &str, dir: &Path, timeout: Option<Duration>) -> VerificationResult {
    let start = Instant::now();
    let failed = |error: String, start: Instant| VerificationResult {
        command: command.to_string(),
        passed: false,
        exit_code: None,
        output: String::new(),
        error: Some(error),
        duration_ms: start.elapsed().as_millis() as u64,
    };

    let child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return failed(format!("failed to spawn: {e}"), start),
    };

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_) => {
                return failed(
                    format!("timed out after {}ms", limit.as_millis()),
                    start,
                )
            }
        },
        None => child.wait_with_output().await,
    };
    let output = match output {
        Ok(output) => output,
        Err(e) => return failed(format!("failed to wait: {e}"), start),
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    VerificationResult {
        command: command.to_string(),
        passed: output.status.success(),
        exit_code: output.status.code(),
        output: combined,
        error: None,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Run `commands` in order, stopping after the first failure.
///
/// The returned list ends at the failing command, if any.
pub async fn run_all(
    commands: &[String],
    dir: &Path,
    timeout: Option<Duration>,
) -> Vec<VerificationResult> {
    let mut results = Vec::with_capacity(commands.len());
    for command in commands {
        let result = run_command(command, dir, timeout).await;
        let passed = result.passed;
        tracing::debug!(command = %command, passed, "verification command finished");
        results.push(result);
        if !passed {
            break;
        }
    }
    results
}
