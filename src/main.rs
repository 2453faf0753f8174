use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "hatrack")]
#[command(version, about = "Autonomous construction orchestrator for intents and their units")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print the structured result of the command as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run hats against units until the intent halts
    Construct {
        /// Intent slug (defaults to the single active intent)
        intent: Option<String>,
    },
    /// Move the intent to its next hat
    Advance { intent: Option<String> },
    /// Send the intent back to its retry hat
    Fail { intent: Option<String> },
    /// Verify, integrate and complete the intent from its terminal hat
    Done { intent: Option<String> },
    /// Rebuild run state from the unit files
    Resume { intent: Option<String> },
    /// Delete the run state of an intent (branches are kept)
    Reset {
        intent: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Show hat, iteration and unit progress
    Status {
        #[arg(long)]
        intent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    hatrack::logging::init(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Construct { intent } => {
            cmd::cmd_construct(&cli, project_dir, intent.as_deref()).await?
        }
        Commands::Advance { intent } => cmd::cmd_advance(&cli, project_dir, intent.as_deref())?,
        Commands::Fail { intent } => cmd::cmd_fail(&cli, project_dir, intent.as_deref())?,
        Commands::Done { intent } => cmd::cmd_done(&cli, project_dir, intent.as_deref()).await?,
        Commands::Resume { intent } => cmd::cmd_resume(&cli, project_dir, intent.as_deref())?,
        Commands::Reset { intent, force } => {
            cmd::cmd_reset(&cli, project_dir, intent.as_deref(), *force)?
        }
        Commands::Status { intent } => cmd::cmd_status(&cli, project_dir, intent.as_deref())?,
    }

    Ok(())
}
