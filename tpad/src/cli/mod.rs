mod config;
mod replay;

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::ConfigCommand;
use replay::ReplayCommand;
use touchpad3d::config::SessionConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    color: colorchoice_clap::Color,

    #[command(subcommand)]
    command: Commands,

    /// Output plain JSON without color
    #[arg(short, long, global = true)]
    json: bool,

    /// Load the session configuration from a JSON file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The session configuration, defaults unless a file was given.
    fn session_config(&self) -> Result<SessionConfig> {
        let Some(path) = &self.config else {
            return Ok(SessionConfig::default());
        };

        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }
}

#[derive(Subcommand)]
enum Commands {
    Replay(ReplayCommand),
    Config(ConfigCommand),
}

pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    cli.color.write_global();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(anstream::stderr)
        .init();

    match &cli.command {
        Commands::Replay(cmd) => cmd.execute(&cli),
        Commands::Config(cmd) => cmd.execute(&cli),
    }
}
