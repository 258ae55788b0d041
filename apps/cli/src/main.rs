//! Autopilot CLI - command-line driver for the autopilot task orchestrator
//!
//! The `autopilot` command pre-loads tasks, runs the orchestration loop, and
//! reports queue, agent and execution status.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{agents, run, status, submit, validate};

/// Autopilot - autonomous task orchestration
///
/// Keeps a priority queue of tasks, routes each one to the best-fit agent,
/// and learns agent performance from every execution.
#[derive(Parser, Debug)]
#[command(
    name = "autopilot",
    author,
    version,
    about = "Autopilot - autonomous task orchestration",
    long_about = "Autopilot runs a long-lived orchestration loop: a priority task queue, duplicate-work detection, learned agent routing and condition-based triggers."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to the config value or info
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (defaults to ./autopilot.toml, then ~/.autopilot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestration loop
    ///
    /// Restores the checkpoint if present, pre-loads tasks, starts the
    /// execution loop and triggers, and runs until Ctrl-C, the duration
    /// elapses, or (with --until-idle) the queue drains. The checkpoint is
    /// saved on exit.
    Run {
        /// Checkpoint file
        #[arg(long, default_value = commands::DEFAULT_STATE_PATH)]
        state: PathBuf,

        /// JSON file with an array of task submissions to pre-load
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Stop once no task is pending or running
        #[arg(long)]
        until_idle: bool,

        /// Shell command executed for every task (simulated agents when absent)
        #[arg(long)]
        command: Option<String>,

        /// Simulated execution time per task in milliseconds
        #[arg(long, default_value_t = 100)]
        simulate_ms: u64,
    },

    /// Add a task to the checkpoint for the next run
    Submit {
        /// Unique task ID
        #[arg(long)]
        id: String,

        /// What the task should accomplish
        #[arg(long)]
        description: String,

        /// Priority (higher runs sooner)
        #[arg(short, long, default_value_t = 50)]
        priority: i64,

        /// Preferred agent
        #[arg(short, long)]
        agent: Option<String>,

        /// Required capability tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Artifact identifier the task produces
        #[arg(long)]
        target: Option<String>,

        /// Checkpoint file
        #[arg(long, default_value = commands::DEFAULT_STATE_PATH)]
        state: PathBuf,
    },

    /// Show orchestrator status
    Status {
        /// Status file written by `run`
        #[arg(long)]
        status_file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List agents and their learned scores
    Agents {
        /// Checkpoint file
        #[arg(long, default_value = commands::DEFAULT_STATE_PATH)]
        state: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and run one simulated task end to end
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = commands::load_config(args.config.as_deref())?;

    let level = match args.log_level.as_deref().or(config.log_level.as_deref()).unwrap_or("info") {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run { state, tasks, duration, until_idle, command, simulate_ms } => {
            run::execute(
                config,
                run::RunOptions { state, tasks, duration, until_idle, command, simulate_ms },
            )
            .await
        }
        Command::Submit { id, description, priority, agent, tags, target, state } => {
            let submission = autopilot_orchestrator::TaskSubmission {
                id,
                description,
                priority,
                preferred_agent: agent,
                tags,
                target,
            };
            submit::execute(config, submission, &state).await
        }
        Command::Status { status_file, json } => status::execute(&config, status_file, json),
        Command::Agents { state, json } => agents::execute(config, &state, json).await,
        Command::Validate => validate::execute(config).await,
    }
}
