use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rag_relay::commands::{build_index, serve, show_status};
use rag_relay::config::{Config, get_config_dir, run_interactive_config, show_config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rag-relay")]
#[command(about = "Streaming LLM chat relay with retrieval-augmented answers")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.rag-relay)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding service and chat model
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Chunk and embed the knowledge file into a vector index
    BuildIndex {
        /// Plain-text knowledge file
        #[arg(long)]
        source: Option<PathBuf>,
        /// Where to write the index
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Start the HTTP relay
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show index and service status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_dir = get_config_dir(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load_with_env(&config_dir)?);
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::BuildIndex { source, output } => {
            let config = Config::load_with_env(&config_dir)?;
            tokio::task::spawn_blocking(move || build_index(&config, source, output))
                .await
                .context("Index build task panicked")??;
        }
        Commands::Serve { host, port } => {
            let config = Config::load_with_env(&config_dir)?;
            serve(&config, host, port).await?;
        }
        Commands::Status => {
            let config = Config::load_with_env(&config_dir)?;
            tokio::task::spawn_blocking(move || show_status(&config))
                .await
                .context("Status task panicked")?;
        }
    }

    Ok(())
}
