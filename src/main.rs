use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "delve")]
#[command(version, about = "Research supervisor with a live, replayable execution tree")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervisor against a scripted decision source and researcher
    Run {
        /// Path to the script (JSON)
        script: PathBuf,

        /// Rounds before delegations are refused. Overrides delve.toml.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Where to write the envelope journal (defaults to .delve/journals/)
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Print progress as the execution tree changes
        #[arg(long)]
        live: bool,

        /// Print the summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Rebuild and print the execution tree recorded in a journal
    Replay {
        journal: PathBuf,

        /// Print materialized events and tree as JSON
        #[arg(long)]
        json: bool,
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
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default delve.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            script,
            max_iterations,
            journal,
            live,
            json,
        } => {
            cmd::cmd_run(
                &project_dir,
                cli.verbose,
                script,
                *max_iterations,
                journal.clone(),
                *live,
                *json,
            )
            .await?;
        }
        Commands::Replay { journal, json } => {
            cmd::cmd_replay(&project_dir, cli.verbose, journal, *json)?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
