use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "onair",
    version,
    about = "Unattended internet-radio playout engine with HLS resume",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (environment variables are used when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream to the encoder and upload segments until interrupted
    Run,

    /// Print the next selections without streaming or recording plays
    Simulate {
        /// Number of tracks to select
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,

        /// Force one selector mode for every rule-driven slot
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Show the persisted stream state and the resume decision
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run => {
            tracing::info!(
                segment_dir = %config.radio.segment_dir.display(),
                default_mode = %config.radio.default_mode,
                "Starting run command"
            );
            commands::run(config).await?;
        }

        Commands::Simulate { count, mode } => {
            tracing::info!(count, mode = ?mode, "Starting simulate command");
            commands::simulate(config, count, mode)?;
        }

        Commands::State => {
            commands::state(config)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("onair=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("onair={level},warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
