use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use remedy::agent::{AgentExecutor, HookSet, Role};
use remedy::config::Config;
use remedy::consolidation::{consolidate_in_store, Suggestion};
use remedy::core::{IssueStatus, TaskGraph};
use remedy::orchestration::{validate_issues, ValidatorAgent};
use remedy::state::{FileStateStore, StateStore};
use remedy::workflow::{Phase, RunMetadata};
use remedy::{rlog, rlog_error, Result};

/// Remedy - agent execution and consolidation scheduler for remediation runs
#[derive(Parser, Debug)]
#[command(name = "remedy")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    REMEDY_DEBUG=1     Enable debug logging (alternative to --debug)\n    REMEDY_LOG=<lvl>   Log level: error, warn, info, debug or trace")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.remedy/remedy.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (defaults to ~/.remedy/remedy.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Merge planned tasks into one ordered plan and save it
    Consolidate {
        /// Work directory (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// File with the consolidator's suggestion (JSON or raw agent output)
        #[arg(long)]
        suggestion: Option<PathBuf>,
    },

    /// Run validator rounds over unvalidated issues
    Validate {
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print the execution order of the saved plan
    Order {
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print issue counts and run state
    Status {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    remedy::log::init(cli.debug);
    rlog!("remedy starting: {:?}", cli.command);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let store = FileStateStore::new(config.effective_state_dir());
    let rt = tokio::runtime::Runtime::new()?;

    let result = match cli.command {
        Command::Consolidate { dir, suggestion } => {
            let dir = work_dir(dir)?;
            rt.block_on(run_consolidate(&store, &dir, suggestion.as_deref()))
        }
        Command::Validate { dir } => {
            let dir = work_dir(dir)?;
            rt.block_on(run_validate(&config, store, &dir))
        }
        Command::Order { dir } => {
            let dir = work_dir(dir)?;
            rt.block_on(run_order(&store, &dir))
        }
        Command::Status { dir } => {
            let dir = work_dir(dir)?;
            rt.block_on(run_status(&store, &dir))
        }
    };
    if let Err(e) = &result {
        rlog_error!("remedy failed: {}", e);
    }
    result
}

fn work_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Load the run for `dir`, or start one, and move it to `phase`.
async fn enter_phase(store: &dyn StateStore, dir: &Path, phase: Phase) -> Result<RunMetadata> {
    let mut run = store.load_run(dir).await?.unwrap_or_default();
    run.enter(phase);
    store.save_run(dir, &run).await?;
    Ok(run)
}

async fn finish_phase(store: &dyn StateStore, dir: &Path, mut run: RunMetadata, ok: bool) -> Result<()> {
    if ok {
        run.complete_phase();
    } else {
        run.fail();
    }
    store.save_run(dir, &run).await
}

async fn run_consolidate(store: &FileStateStore, dir: &Path, suggestion: Option<&Path>) -> Result<()> {
    let suggestion = match suggestion {
        Some(path) => Suggestion::from_text(&tokio::fs::read_to_string(path).await?),
        None => Suggestion::none(),
    };
    let run = enter_phase(store, dir, Phase::Consolidate).await?;
    let consolidated = match consolidate_in_store(store, dir, &suggestion).await {
        Ok(consolidated) => consolidated,
        Err(e) => {
            finish_phase(store, dir, run, false).await?;
            return Err(e);
        }
    };
    finish_phase(store, dir, run, consolidated.is_acyclic()).await?;
    print_json(&consolidated)
}

async fn run_validate(config: &Config, store: FileStateStore, dir: &Path) -> Result<()> {
    let executor = AgentExecutor::new(ValidatorAgent, config.backend_registry()?)
        .with_config(config.execution_config(Role::Validator));
    let store: Arc<dyn StateStore> = Arc::new(store);

    let run = enter_phase(store.as_ref(), dir, Phase::Validate).await?;
    let report = validate_issues(
        store.clone(),
        dir,
        Arc::new(executor),
        &HookSet::new(),
        &config.round_config(),
    )
    .await;
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            finish_phase(store.as_ref(), dir, run, false).await?;
            return Err(e);
        }
    };
    finish_phase(store.as_ref(), dir, run, report.is_converged()).await?;
    print_json(&report)
}

async fn run_order(store: &FileStateStore, dir: &Path) -> Result<()> {
    let nodes = store.load_graph(dir).await?;
    let graph = if nodes.is_empty() {
        TaskGraph::from_tasks(&store.load_tasks(dir).await?)
    } else {
        TaskGraph::new(nodes)
    };
    print_json(&graph.topological_sort(&[]))
}

async fn run_status(store: &FileStateStore, dir: &Path) -> Result<()> {
    let issues = store.load_issues(dir).await?;
    let tasks = store.load_tasks(dir).await?;
    let run = store.load_run(dir).await?;

    let mut by_status: BTreeMap<String, usize> = IssueStatus::ALL
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
    for issue in &issues {
        *by_status.entry(issue.status.as_str().to_string()).or_default() += 1;
    }

    print_json(&serde_json::json!({
        "workDir": dir.display().to_string(),
        "issues": by_status,
        "tasks": tasks.len(),
        "run": run,
    }))
}
