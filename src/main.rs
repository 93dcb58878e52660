use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use sprintline::config::SprintlineConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "sprintline")]
#[command(version, about = "Sprint and roadmap reconciler for Jira boards")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to sprintline.toml. Defaults to ./sprintline.toml, then the user config dir.
    #[arg(long, global = true, env = "SPRINTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run cycles on the configured schedule until Ctrl-C
    Run,
    /// Run a single cycle against the tracker and print its summary
    Cycle {
        /// Date the cycle runs for (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run cycles against a board fixture instead of the tracker
    Simulate {
        /// JSON board fixture
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long, default_value = "1")]
        cycles: usize,
        /// Date every cycle runs for (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate the configuration and credentials
    Validate,
    /// Write a default sprintline.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { command } => return cmd::cmd_config(cli.config.as_deref(), command),
        command => command,
    };

    let config = SprintlineConfig::load(cli.config.as_deref())?;
    let _log_guard = sprintline::logging::init(&config.toml.logging, cli.verbose)?;

    match command {
        Commands::Run => cmd::cmd_run(&config).await?,
        Commands::Cycle { date } => cmd::cmd_cycle(&config, date).await?,
        Commands::Simulate {
            fixture,
            cycles,
            date,
        } => cmd::cmd_simulate(&config, &fixture, cycles, date).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
