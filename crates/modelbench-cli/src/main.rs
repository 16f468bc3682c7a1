//! ModelBench CLI
//!
//! The `modelbench` command compares model configurations on the same work.
//!
//! ## Commands
//!
//! - `bench`: run a shell command once per model with bounded concurrency
//! - `exec`: run an agent on a task in git isolation, one model at a time
//! - `exec-loop`: same as `exec` for a multi-task loop
//! - `runs`: list or show stored runs

mod shell;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use modelbench_core::{
    open_run_store, write_report_md, BenchSettings, BenchmarkDispatcher, BenchmarkRun,
    ExecutionBenchmark, ExecutionOptions, GitRepo, LoopBenchmarkOptions, ModelConfig,
    OperationRegistry, ProgressEvent, ProgressSink, RunId, RunReport, RunStore,
};
use shell::{CommandOperation, ShellExecutor, COMMAND_OPERATION};

#[derive(Parser)]
#[command(name = "modelbench")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark model configurations side by side", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Run store URL (mem://, surrealkv://path, file://dir)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a shell command once per model and compare the results
    ///
    /// The command sees MODELBENCH_PROVIDER, MODELBENCH_MODEL and
    /// MODELBENCH_REASONING; its stdout lines are the streamed output.
    Bench {
        /// Shell command to benchmark
        #[arg(short, long)]
        command: String,

        /// Model to compare, as provider:model[:reasoning=N] (repeatable)
        #[arg(short, long = "model", required = true)]
        models: Vec<ModelConfig>,

        /// Maximum attempts in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Minimum spacing between attempt launches, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Also write the Markdown comparison table to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run an agent command on a task, one isolated branch per model
    Exec {
        #[command(flatten)]
        agent: AgentArgs,

        /// Task reference passed to the agent as MODELBENCH_TASK
        #[arg(short, long)]
        task: String,

        /// Verification command run after each pass (repeatable)
        #[arg(long = "verify")]
        verify: Vec<String>,

        /// Model to escalate to on retry n+1 (repeatable, in order)
        #[arg(long = "try-model")]
        try_models: Vec<ModelConfig>,

        /// Passes per model, including the first
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Run an agent command on a multi-task loop, one isolated branch per model
    ExecLoop {
        #[command(flatten)]
        agent: AgentArgs,

        /// Loop options as JSON, passed to the agent as MODELBENCH_LOOP_OPTIONS
        #[arg(long, default_value = "{}")]
        loop_options: String,

        /// Verification command run after the loop (repeatable)
        #[arg(long = "verify")]
        verify: Vec<String>,
    },

    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(clap::Args)]
struct AgentArgs {
    /// Agent shell command, run in the repository directory
    #[arg(short, long)]
    agent: String,

    /// Model to compare, as provider:model[:reasoning=N] (repeatable)
    #[arg(short, long = "model", required = true)]
    models: Vec<ModelConfig>,

    /// Repository the agent works in
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Keep isolation branches after the run
    #[arg(long)]
    keep_branches: bool,

    /// Commit leftover changes on the isolation branch
    #[arg(long)]
    auto_commit: bool,

    /// Per-command verification timeout, in seconds
    #[arg(long)]
    verify_timeout_secs: Option<u64>,

    /// Also write the Markdown comparison table to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum RunsAction {
    /// List stored runs, newest first
    List {
        /// Only runs over the input with this digest
        #[arg(long)]
        input_digest: Option<String>,
    },

    /// Show one run
    Show {
        /// Run ID
        id: String,

        /// Render the comparison table instead of JSON
        #[arg(long)]
        markdown: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = BenchSettings::from_env().context("Invalid MODELBENCH_* settings")?;
    if let Some(store) = cli.store {
        settings.store_url = store;
    }

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    modelbench_core::init_tracing(cli.json || settings.json_logs, level);

    let store = open_run_store(&settings.store_url)
        .await
        .with_context(|| format!("Failed to open run store at {}", settings.store_url))?;

    match cli.command {
        Commands::Bench {
            command,
            models,
            concurrency,
            delay_ms,
            report,
        } => {
            if let Some(c) = concurrency {
                settings.concurrency = c;
            }
            if let Some(d) = delay_ms {
                settings.delay_ms = d;
            }
            let run = cmd_bench(store, &settings, &command, models, print_progress()).await?;
            print_run(&run, report.as_deref())
        }
        Commands::Exec {
            agent,
            task,
            verify,
            try_models,
            max_retries,
        } => {
            let mut options = ExecutionOptions::new(task);
            options.verification_commands = verify;
            options.try_models = try_models;
            options.max_retries = max_retries.unwrap_or(settings.max_retries);
            options.keep_branches = agent.keep_branches;
            options.auto_commit = agent.auto_commit;
            options.verification_timeout = agent.verify_timeout_secs.map(Duration::from_secs);
            let run = cmd_exec(store, &settings, &agent, &options, print_progress()).await?;
            print_run(&run, agent.report.as_deref())
        }
        Commands::ExecLoop {
            agent,
            loop_options,
            verify,
        } => {
            let loop_options: Value =
                serde_json::from_str(&loop_options).context("--loop-options is not valid JSON")?;
            let mut options = LoopBenchmarkOptions::new(loop_options);
            options.verification_commands = verify;
            options.keep_branches = agent.keep_branches;
            options.auto_commit = agent.auto_commit;
            options.verification_timeout = agent.verify_timeout_secs.map(Duration::from_secs);
            let run = cmd_exec_loop(store, &settings, &agent, &options, print_progress()).await?;
            print_run(&run, agent.report.as_deref())
        }
        Commands::Runs { action } => match action {
            RunsAction::List { input_digest } => {
                cmd_runs_list(store.as_ref(), input_digest.as_deref()).await
            }
            RunsAction::Show { id, markdown } => cmd_runs_show(store.as_ref(), &id, markdown).await,
        },
    }
}

fn print_progress() -> ProgressSink {
    ProgressSink::new(|event| match event {
        ProgressEvent::Start { model_id } => eprintln!("[{model_id}] started"),
        ProgressEvent::Progress { .. } => {}
        ProgressEvent::Complete {
            model_id,
            duration_ms,
        } => eprintln!("[{model_id}] ok in {duration_ms} ms"),
        ProgressEvent::Error {
            model_id,
            duration_ms,
            error,
        } => eprintln!("[{model_id}] failed after {duration_ms} ms: {error}"),
    })
}

fn print_run(run: &BenchmarkRun, report: Option<&Path>) -> Result<()> {
    println!("{}", RunReport::from_run(run).render_markdown());
    println!("Run: {}", run.id);
    if let Some(path) = report {
        write_report_md(path, run)?;
        println!("Report written to {:?}", path);
    }
    Ok(())
}

async fn cmd_bench(
    store: Arc<dyn RunStore>,
    settings: &BenchSettings,
    command: &str,
    models: Vec<ModelConfig>,
    progress: ProgressSink,
) -> Result<BenchmarkRun> {
    let config = settings.run_config(models)?;

    let mut registry = OperationRegistry::new();
    registry.register(CommandOperation);
    let dispatcher = BenchmarkDispatcher::new(Arc::new(registry)).with_store(store);

    info!(command, models = config.models().len(), "Starting bench");
    let run = dispatcher
        .run(
            COMMAND_OPERATION,
            json!({ "command": command }),
            &config,
            progress,
        )
        .await?;
    Ok(run)
}

async fn execution_benchmark(
    store: Arc<dyn RunStore>,
    settings: &BenchSettings,
    agent: &AgentArgs,
) -> Result<ExecutionBenchmark> {
    let repo = GitRepo::new(&agent.repo);
    if !repo.is_git_repo().await {
        anyhow::bail!("{:?} is not a git repository", agent.repo);
    }
    let executor = Arc::new(ShellExecutor::new(&agent.agent, &agent.repo));
    Ok(ExecutionBenchmark::new(repo, executor)
        .with_store(store)
        .with_branch_prefix(&settings.branch_prefix))
}

async fn cmd_exec(
    store: Arc<dyn RunStore>,
    settings: &BenchSettings,
    agent: &AgentArgs,
    options: &ExecutionOptions,
    progress: ProgressSink,
) -> Result<BenchmarkRun> {
    let config = settings.run_config(agent.models.clone())?;
    info!(task = %options.task_ref, repo = ?agent.repo, "Starting execution benchmark");
    let run = execution_benchmark(store, settings, agent)
        .await?
        .run_execution_benchmark(options, &config, progress)
        .await?;
    Ok(run)
}

async fn cmd_exec_loop(
    store: Arc<dyn RunStore>,
    settings: &BenchSettings,
    agent: &AgentArgs,
    options: &LoopBenchmarkOptions,
    progress: ProgressSink,
) -> Result<BenchmarkRun> {
    let config = settings.run_config(agent.models.clone())?;
    info!(repo = ?agent.repo, "Starting loop benchmark");
    let run = execution_benchmark(store, settings, agent)
        .await?
        .run_execute_loop_benchmark(options, &config, progress)
        .await?;
    Ok(run)
}

async fn cmd_runs_list(store: &dyn RunStore, input_digest: Option<&str>) -> Result<()> {
    let runs = match input_digest {
        Some(digest) => store.list_by_input(digest).await?,
        None => store.list().await?,
    };

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {}  {:<16}  {} model(s), {} failed",
            run.id,
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
            run.operation,
            run.model_count,
            run.failures
        );
    }
    Ok(())
}

async fn cmd_runs_show(store: &dyn RunStore, id: &str, markdown: bool) -> Result<()> {
    let run = store
        .get(&RunId::from(id))
        .await
        .with_context(|| format!("Failed to load run {id}"))?;

    if markdown {
        println!("{}", RunReport::from_run(&run).render_markdown());
    } else {
        println!("{}", serde_json::to_string_pretty(&run)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbench_core::attempt_commit;
    use std::process::Command;

    async fn mem_store() -> Arc<dyn RunStore> {
        open_run_store("mem://").await.unwrap()
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q", "-b", "main"]);
        git(dir.path(), &["config", "user.email", "bench@example.com"]);
        git(dir.path(), &["config", "user.name", "Bench"]);
        std::fs::write(dir.path().join("README.md"), "seed\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "seed"]);
        dir
    }

    fn agent_args(repo: &Path, agent: &str, models: &[&str]) -> AgentArgs {
        AgentArgs {
            agent: agent.to_string(),
            models: models.iter().map(|m| m.parse().unwrap()).collect(),
            repo: repo.to_path_buf(),
            keep_branches: false,
            auto_commit: true,
            verify_timeout_secs: None,
            report: None,
        }
    }

    #[test]
    fn cli_parses_bench_flags() {
        let cli = Cli::try_parse_from([
            "modelbench",
            "--json",
            "bench",
            "--command",
            "echo hi",
            "--model",
            "openai:gpt-4o",
            "--model",
            "anthropic:claude:reasoning=1024",
            "--concurrency",
            "2",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Bench {
                models,
                concurrency,
                ..
            } => {
                assert_eq!(models.len(), 2);
                assert_eq!(models[1].reasoning_effort(), Some(1024));
                assert_eq!(concurrency, Some(2));
            }
            _ => panic!("expected bench"),
        }
    }

    #[test]
    fn cli_rejects_malformed_model_id() {
        let parsed = Cli::try_parse_from([
            "modelbench",
            "bench",
            "--command",
            "true",
            "--model",
            "no-provider",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn bench_keeps_request_order_and_isolates_failures() {
        let store = mem_store().await;
        let run = cmd_bench(
            store.clone(),
            &BenchSettings {
                concurrency: 2,
                ..BenchSettings::default()
            },
            "if [ \"$MODELBENCH_MODEL\" = bad ]; then exit 3; fi; echo \"$MODELBENCH_MODEL\"",
            vec!["p:good".parse().unwrap(), "p:bad".parse().unwrap()],
            ProgressSink::none(),
        )
        .await
        .unwrap();

        assert_eq!(run.results.len(), 2);
        assert_eq!(run.results[0].model_id, "p:good");
        assert!(run.results[0].is_success());
        assert_eq!(run.results[0].output, Some(json!("good\n")));
        assert!(!run.results[1].is_success());

        let stored = store.get(&run.id).await.unwrap();
        assert_eq!(stored.id, run.id);
        assert_eq!(stored.results[1].error, run.results[1].error);
        cmd_runs_show(store.as_ref(), &run.id.0, true).await.unwrap();
        cmd_runs_list(store.as_ref(), Some(&run.input_digest))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exec_commits_on_isolation_branch_and_returns_to_main() {
        let repo = git_repo();
        let agent = agent_args(
            repo.path(),
            "echo \"$MODELBENCH_TASK\" > task.txt",
            &["p:one", "p:two"],
        );
        let mut options = ExecutionOptions::new("T-7");
        options.verification_commands = vec!["test -f task.txt".to_string()];
        options.auto_commit = agent.auto_commit;

        let run = cmd_exec(
            mem_store().await,
            &BenchSettings::default(),
            &agent,
            &options,
            ProgressSink::none(),
        )
        .await
        .unwrap();

        assert!(run.results.iter().all(|r| r.is_success()), "{run:#?}");
        assert_eq!(run.config.concurrency(), 1);
        assert!(!repo.path().join("task.txt").exists());
        for result in &run.results {
            let commit = attempt_commit(result).expect("auto-commit recorded");
            let changed = Command::new("git")
                .args(["show", "--name-only", "--format=", &commit.sha])
                .current_dir(repo.path())
                .output()
                .unwrap();
            assert_eq!(String::from_utf8_lossy(&changed.stdout).trim(), "task.txt");
        }
        let head = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&head.stdout).trim(), "main");
    }

    #[tokio::test]
    async fn exec_loop_passes_loop_options_to_agent() {
        let repo = git_repo();
        let agent = agent_args(
            repo.path(),
            "echo \"$MODELBENCH_LOOP_OPTIONS\"",
            &["p:one"],
        );
        let options = LoopBenchmarkOptions::new(json!({"max_tasks": 2}));

        let run = cmd_exec_loop(
            mem_store().await,
            &BenchSettings::default(),
            &agent,
            &options,
            ProgressSink::none(),
        )
        .await
        .unwrap();

        assert_eq!(run.operation, "execute-loop");
        let output = run.results[0].output.clone().unwrap();
        assert!(output.as_str().unwrap().contains("max_tasks"), "{output}");
    }

    #[tokio::test]
    async fn exec_outside_a_repository_fails_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_args(dir.path(), "true", &["p:one"]);
        let err = cmd_exec(
            mem_store().await,
            &BenchSettings::default(),
            &agent,
            &ExecutionOptions::new("T-1"),
            ProgressSink::none(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not a git repository"), "{err}");
    }

    #[tokio::test]
    async fn runs_show_unknown_id_fails() {
        let store = mem_store().await;
        assert!(cmd_runs_show(store.as_ref(), "missing", false).await.is_err());
    }
}
