//! Recollect CLI: the main entry point.
//!
//! Commands:
//! - `ingest`: score a transcript and show each block's tier and status
//! - `stats`: watch the live stats feed while a transcript is ingested
//! - `config`: show, validate or print the default configuration

use clap::{Parser, Subcommand};
use recollect_config::EngineConfig;
use std::path::PathBuf;

mod commands;
mod transcript;

#[derive(Parser)]
#[command(
    name = "recollect",
    about = "Recollect: relevance-scored conversation memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.recollect/config.toml
    #[arg(short, long, global = true, env = "RECOLLECT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a transcript and report relevance, tier and status per block
    Ingest {
        /// Transcript file, one turn per line (`-` for stdin)
        path: PathBuf,

        /// Session the turns belong to
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Goal the session is working toward
        #[arg(short, long)]
        goal: Option<String>,

        /// Correction cycles to run after ingestion
        #[arg(long, default_value_t = 0)]
        cycles: u32,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Ingest a transcript with the background tasks running and print stats snapshots
    Stats {
        /// Transcript file, one turn per line (`-` for stdin)
        path: PathBuf,

        #[arg(short, long, default_value = "default")]
        session: String,

        /// Snapshots to print before exiting
        #[arg(short = 'n', long, default_value_t = 1)]
        samples: u32,

        /// Print one JSON snapshot per line
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the built-in defaults as TOML
    Defaults,
    /// Print the default config file path
    Path,
    /// Check the config file for errors
    Validate,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = EngineConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => EngineConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            path,
            session,
            goal,
            cycles,
            json,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let args = commands::ingest::IngestArgs {
                path,
                session,
                goal,
                cycles,
                json,
            };
            commands::ingest::run(config, args).await?
        }
        Commands::Stats {
            path,
            session,
            samples,
            json,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let args = commands::stats::StatsArgs {
                path,
                session,
                samples,
                json,
            };
            commands::stats::run(config, args).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&load_config(cli.config.as_ref())?)?,
            ConfigAction::Defaults => commands::config_cmd::defaults(),
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate(cli.config.as_deref())?,
        },
    }

    Ok(())
}
