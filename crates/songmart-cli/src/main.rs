//! CLI runner for the songmart ETL pipeline.

mod error;

use std::path::PathBuf;

use clap::Parser;
use snafu::ResultExt;
use songmart_core::{config::EtlConfig, pipeline};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CliResult, LoadConfigSnafu, RunSnafu};

/// Derive star-schema Parquet tables from raw song-play data.
#[derive(Debug, Parser)]
#[command(name = "songmart", version)]
struct Cli {
    /// Path to the JSON run configuration
    #[arg(long, default_value = "songmart.json")]
    config: PathBuf,
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let config = EtlConfig::load(&cli.config).context(LoadConfigSnafu {
        path: cli.config.display().to_string(),
    })?;
    info!(
        input_root = %config.input_root,
        output_root = %config.output_root,
        "starting pipeline run"
    );

    pipeline::run(&config).await.context(RunSnafu)
}


#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
