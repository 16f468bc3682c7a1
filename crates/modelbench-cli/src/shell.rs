//! Shell-command collaborators.
//!
//! `CommandOperation` benchmarks an arbitrary command as a provider call;
//! `ShellExecutor` runs an agent command against the working tree. Both
//! stream the child's stdout line by line and describe the model through
//! `MODELBENCH_*` environment variables.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use modelbench_core::{
    AttemptContext, ModelConfig, Operation, OperationOutput, StreamSink, TaskExecutor, WorkUnit,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Operation id the `bench` command registers.
pub const COMMAND_OPERATION: &str = "command";

/// How much of stderr to quote in a failure message.
const STDERR_TAIL: usize = 2_000;

fn model_env(model: &ModelConfig) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("MODELBENCH_PROVIDER", model.provider().to_string()),
        ("MODELBENCH_MODEL", model.model().to_string()),
        ("MODELBENCH_MODEL_ID", model.id()),
    ];
    if let Some(budget) = model.reasoning_effort() {
        env.push(("MODELBENCH_REASONING", budget.to_string()));
    }
    env
}

/// Run `sh -c <command>`, pushing each stdout line into `stream`.
///
/// A non-zero exit is an error carrying the tail of stderr.
pub async fn run_streaming(
    command: &str,
    dir: Option<&Path>,
    env: Vec<(&'static str, String)>,
    stream: &StreamSink,
) -> Result<OperationOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn `{command}`"))?;
    let stdout = child.stdout.take().context("child stdout not captured")?;
    let mut stderr = child.stderr.take().context("child stderr not captured")?;

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    });

    // Non-UTF-8 bytes become U+FFFD.
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .context("failed to read stdout")?;
        if read == 0 {
            break;
        }
        stream.push(&String::from_utf8_lossy(&line));
    }

    let status = child.wait().await.context("failed to wait for command")?;
    let stderr = stderr_task.await.unwrap_or_default();
    if !status.success() {
        let tail = tail_chars(stderr.trim(), STDERR_TAIL);
        match status.code() {
            Some(code) => bail!("`{command}` exited with {code}: {tail}"),
            None => bail!("`{command}` was terminated by a signal: {tail}"),
        }
    }

    // Null lets the collector substitute the streamed text.
    Ok(OperationOutput::new(Value::Null))
}

/// Last `n` characters of `text`.
fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let start = text
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i);
    &text[start..]
}

/// Benchmarks a shell command given in the input as `{"command": "..."}`.
pub struct CommandOperation;

#[async_trait]
impl Operation for CommandOperation {
    fn id(&self) -> &str {
        COMMAND_OPERATION
    }

    fn name(&self) -> &str {
        "Shell command"
    }

    fn description(&self) -> &str {
        "Runs a shell command once per model; stdout is the streamed output"
    }

    fn validate_input(&self, input: &Value) -> bool {
        input
            .get("command")
            .and_then(Value::as_str)
            .is_some_and(|c| !c.trim().is_empty())
    }

    async fn execute(
        &self,
        input: &Value,
        model: &ModelConfig,
        stream: StreamSink,
    ) -> Result<OperationOutput> {
        let command = input
            .get("command")
            .and_then(Value::as_str)
            .context("input has no command")?;
        run_streaming(command, None, model_env(model), &stream).await
    }
}

/// Runs an agent command inside the repository for execution benchmarks.
pub struct ShellExecutor {
    agent: String,
    repo_dir: PathBuf,
}

impl ShellExecutor {
    pub fn new(agent: impl Into<String>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent: agent.into(),
            repo_dir: repo_dir.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(
        &self,
        work: &WorkUnit,
        model: &ModelConfig,
        ctx: &AttemptContext,
        stream: StreamSink,
    ) -> Result<OperationOutput> {
        let mut env = model_env(model);
        env.push(("MODELBENCH_ATTEMPT", ctx.attempt_number.to_string()));
        env.push(("MODELBENCH_BRANCH", ctx.branch_name.clone()));
        match work {
            WorkUnit::Task { task_ref } => env.push(("MODELBENCH_TASK", task_ref.clone())),
            WorkUnit::Loop { loop_options } => {
                env.push(("MODELBENCH_LOOP_OPTIONS", loop_options.to_string()))
            }
        }
        run_streaming(&self.agent, Some(&self.repo_dir), env, &stream).await
    }
}
