pub mod types;
pub mod config;
pub mod data;
pub mod processing;
pub mod render;
pub mod view;
pub mod page;
pub mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-render the national state and municipality maps for every year
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve the interactive dashboard
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            info!("Generating maps with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            // 1. Load Data
            let dataset = data::load_dataset(&app_config)?;

            // 2. Join and render every (year, level) document
            render::generate_documents(&app_config, &dataset)?;

            info!("Generation complete!");
        }
        Commands::Serve { config } => {
            info!("Serving dashboard with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            let dataset = data::load_dataset(&app_config)?;

            server::start_server(app_config, dataset).await?;
        }
    }

    Ok(())
}
