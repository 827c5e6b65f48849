use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agentmd_progress::config::{Config, Overrides};
use agentmd_progress::telemetry;
use agentmd_progress::ui::UiMode;

mod cmd;

#[derive(Parser)]
#[command(name = "agentmd-progress")]
#[command(version, about = "Follow AGENTS.md generation runs in real time")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Backend base URL. Overrides AGENTMD_BASE_URL and progress.toml.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Keep only the most recent N events per channel
    #[arg(long, global = true)]
    pub max_chunks: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow a generation run, or show its stored snapshot if one exists
    Watch {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        repo: String,

        /// Codebases to generate for (repeatable)
        #[arg(long = "codebase", required = true)]
        codebases: Vec<String>,

        /// UI output mode
        #[arg(long, value_enum, default_value = "full")]
        ui: UiMode,

        /// Ignore any stored snapshot and regenerate
        #[arg(long)]
        rerun: bool,
    },
    /// Fetch the stored snapshot for a repository
    Snapshot {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        repo: String,

        /// Print the documentation as markdown
        #[arg(long)]
        markdown: bool,

        /// Write the markdown to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fold a recorded event log (JSON lines or SSE capture) offline
    Replay {
        recording: PathBuf,

        /// Codebases to seed before replaying (repeatable)
        #[arg(long = "codebase")]
        codebases: Vec<String>,

        #[arg(long, value_enum, default_value = "minimal")]
        ui: UiMode,

        /// Print the aggregated documentation as markdown
        #[arg(long)]
        markdown: bool,
    },
    /// Serve a fixture as a generation backend
    MockServer {
        #[arg(long)]
        fixture: PathBuf,

        #[arg(short, long, default_value = "8001")]
        port: u16,

        /// Pause before each event, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Answer snapshot requests with 404
        #[arg(long)]
        no_snapshot: bool,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
    /// Initialize a default progress.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_json)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let overrides = Overrides {
        base_url: cli.base_url.clone(),
        max_chunks: cli.max_chunks,
    };

    match &cli.command {
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, &overrides, command.clone())?;
        }
        Commands::MockServer {
            fixture,
            port,
            delay_ms,
            no_snapshot,
            dev,
        } => {
            cmd::cmd_mock_server(fixture, *port, *delay_ms, !*no_snapshot, *dev).await?;
        }
        Commands::Replay {
            recording,
            codebases,
            ui,
            markdown,
        } => {
            let config = Config::resolve(&project_dir, &overrides)?;
            cmd::cmd_replay(&config, recording, codebases, *ui, *markdown, cli.verbose)?;
        }
        Commands::Watch {
            owner,
            repo,
            codebases,
            ui,
            rerun,
        } => {
            let config = Config::resolve(&project_dir, &overrides)?;
            let args = cmd::WatchArgs {
                owner: owner.clone(),
                repo: repo.clone(),
                codebases: codebases.clone(),
                ui: *ui,
                rerun: *rerun,
                verbose: cli.verbose,
            };
            cmd::cmd_watch(&config, args).await?;
        }
        Commands::Snapshot {
            owner,
            repo,
            markdown,
            output,
        } => {
            let config = Config::resolve(&project_dir, &overrides)?;
            cmd::cmd_snapshot(&config, owner, repo, *markdown, output.as_deref()).await?;
        }
    }

    Ok(())
}
