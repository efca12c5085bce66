//! CLI surface. The core verb is `run`; `validate` checks a workflow's
//! schema and DAG without executing it, and `functions` lists the
//! function registry.

pub mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use tracing::error;

use crate::cache::{Cache, DiskCache, NoCache};
use crate::error::ConstructionError;
use crate::pool::isolated::IsolatedPool;
use crate::pool::shared::SharedPool;
use crate::pool::ExecutorPool;
use crate::registry::FunctionRegistry;
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::workflow::parse_workflow;
use config::RunnerConfig;

#[derive(Parser)]
#[command(name = "dagrunner", version, about = "Parallel DAG workflow engine")]
pub struct Cli {
    /// Path to a dagrunner.yaml config file (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow description
    Run {
        /// Path to the workflow JSON document
        workflow: PathBuf,

        /// Global worker cap (default: number of hardware threads)
        #[arg(long)]
        max_workers: Option<usize>,

        /// Executor pool kind: "process" (isolated) or "thread" (shared)
        #[arg(long)]
        executor: Option<String>,

        /// Per-tag concurrency caps, e.g. "io=2,cpu=4"
        #[arg(long)]
        tag_limits: Option<String>,

        /// Cache directory (absent disables the cache)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Where to write the JSON run summary
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Overall run timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Validate a workflow description without executing it
    Validate {
        /// Path to the workflow JSON document
        workflow: PathBuf,
    },

    /// List the functions registered in the function registry
    Functions,
}

pub async fn run_cli() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    let file_config = RunnerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            workflow,
            max_workers,
            executor,
            tag_limits,
            cache_dir,
            summary_json,
            timeout,
        } => {
            cmd_run(
                workflow,
                max_workers,
                executor,
                tag_limits,
                cache_dir,
                summary_json,
                timeout,
                file_config,
            )
            .await
        }
        Commands::Validate { workflow } => cmd_validate(workflow),
        Commands::Functions => cmd_functions(),
    }
}

/// Parse `"tag=N,tag=N"` into a cap map. Used for both the `--tag-limits`
/// flag and (after YAML parsing) the config file's `tag_limits` map.
fn parse_tag_limits(raw: &str) -> Result<HashMap<String, usize>> {
    let mut limits = HashMap::new();
    for entry in raw.split(',').filter(|s| !s.is_empty()) {
        let (tag, limit) = entry
            .split_once('=')
            .with_context(|| format!("invalid --tag-limits entry '{entry}', expected tag=N"))?;
        let limit: usize = limit
            .parse()
            .with_context(|| format!("invalid --tag-limits limit for '{tag}': '{limit}'"))?;
        limits.insert(tag.to_string(), limit);
    }
    Ok(limits)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    workflow_path: PathBuf,
    max_workers: Option<usize>,
    executor: Option<String>,
    tag_limits: Option<String>,
    cache_dir: Option<PathBuf>,
    summary_json: Option<PathBuf>,
    timeout: Option<f64>,
    file_config: RunnerConfig,
) -> Result<std::process::ExitCode> {
    // CLI flags override the config file, which overrides built-in
    // defaults.
    let max_workers = max_workers
        .or(file_config.max_workers)
        .unwrap_or_else(num_cpus::get);
    let executor_kind = executor.or(file_config.executor).unwrap_or_else(|| "thread".to_string());
    let tag_limits = match tag_limits {
        Some(raw) => parse_tag_limits(&raw)?,
        None => file_config.tag_limits.unwrap_or_default(),
    };
    let cache_dir = cache_dir.or_else(|| file_config.cache_dir.map(PathBuf::from));
    let summary_json = summary_json.or_else(|| file_config.summary_json.map(PathBuf::from));
    let overall_timeout = timeout
        .or(file_config.timeout)
        .map(Duration::from_secs_f64);

    let raw = std::fs::read_to_string(&workflow_path)
        .with_context(|| format!("failed to read workflow file: {}", workflow_path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("workflow file is not valid JSON: {}", workflow_path.display()))?;

    let workflow = match parse_workflow(&json) {
        Ok(wf) => wf,
        Err(errors) => {
            for e in &errors {
                error!(%e, "schema error");
            }
            return Ok(std::process::ExitCode::from(2));
        }
    };

    let registry = Arc::new(FunctionRegistry::with_builtins());
    let pool: Arc<dyn ExecutorPool> = match executor_kind.as_str() {
        "process" => Arc::new(IsolatedPool::new(max_workers)),
        "thread" => Arc::new(SharedPool::new(max_workers)),
        other => bail!("unknown --executor '{other}', expected 'process' or 'thread'"),
    };
    let cache: Arc<dyn Cache> = match &cache_dir {
        Some(dir) => Arc::new(DiskCache::new(dir)),
        None => Arc::new(NoCache),
    };

    let config = SchedulerConfig {
        global_cap: max_workers,
        tag_limits,
        default_retry: RetryPolicy::default(),
        overall_timeout,
    };

    let scheduler = match Scheduler::new(workflow, pool, cache, registry, config) {
        Ok(s) => s,
        Err(ConstructionError::Cycle(e)) => {
            error!(%e, "cycle error");
            return Ok(std::process::ExitCode::from(2));
        }
        Err(ConstructionError::UnknownFunction(e)) => {
            error!(%e, "unknown function");
            return Ok(std::process::ExitCode::from(2));
        }
    };

    let summary = scheduler.run().await;
    let report = summary.report();

    if let Some(path) = &summary_json {
        summary
            .write_json(path)
            .await
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    println!(
        "{} succeeded, {} failed, {} skipped ({} tasks, {} attempts total, {} cache hits)",
        report.succeeded,
        report.failed,
        report.skipped,
        report.total_tasks,
        report.total_attempts,
        report.total_cache_hits,
    );

    let exit_code = if report.failed > 0 || report.skipped > 0 { 1 } else { 0 };
    Ok(std::process::ExitCode::from(exit_code))
}

fn cmd_validate(workflow_path: PathBuf) -> Result<std::process::ExitCode> {
    let raw = std::fs::read_to_string(&workflow_path)
        .with_context(|| format!("failed to read workflow file: {}", workflow_path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("workflow file is not valid JSON: {}", workflow_path.display()))?;

    let workflow = match parse_workflow(&json) {
        Ok(wf) => wf,
        Err(errors) => {
            println!("Validation: FAILED");
            for e in &errors {
                println!("  - {e}");
            }
            return Ok(std::process::ExitCode::from(2));
        }
    };

    match crate::graph::Graph::build(&workflow) {
        Ok(_) => {
            println!("Validation: OK");
            println!("Workflow: {} ({} tasks)", workflow.name, workflow.tasks.len());
            for (id, spec) in &workflow.tasks {
                let deps = if spec.deps.is_empty() {
                    "(no dependencies)".to_string()
                } else {
                    format!("depends on: {}", spec.deps.iter().cloned().collect::<Vec<_>>().join(", "))
                };
                println!("  {id} [{}] {deps}", spec.function_ref);
            }
            Ok(std::process::ExitCode::from(0))
        }
        Err(e) => {
            println!("Validation: FAILED");
            println!("  - {e}");
            Ok(std::process::ExitCode::from(2))
        }
    }
}

fn cmd_functions() -> Result<std::process::ExitCode> {
    let registry = FunctionRegistry::with_builtins();
    println!("{:<20}", "FUNCTION");
    println!("{}", "-".repeat(40));
    for name in registry.list() {
        println!("{name}");
    }
    println!("\nTotal: {} function(s)", registry.list().len());
    Ok(std::process::ExitCode::from(0))
}
