use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rbk::config::load_config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rbk", version, about = "Nightly incremental backup orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full nightly backup cycle
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run only the retention and archive passes
    Cleanup {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let cfg = load_config(&config)?;
            rbk::run::run(cfg).await
        }
        Commands::Cleanup { config } => {
            let cfg = load_config(&config)?;
            rbk::run::run_cleanup(cfg).await
        }
    }
}
