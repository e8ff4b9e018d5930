//! Cavern - CLI entrypoint.
//!
//! Usage:
//!   cavern start --config config/cavern.toml
//!   cavern start --kv-port 11210 --http-port 8091
//!   cavern config validate --file config/cavern.toml
//!   cavern config show --format json

use anyhow::Result;
use cavern::cli::commands::{run_config, run_start};
use cavern::cli::{Cli, Commands};
use clap::Parser;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Start(args) => run_start(args, config_path.as_deref(), cli.log_level).await,
        Commands::Config(args) => run_config(args, config_path.as_deref()),
    }
}
