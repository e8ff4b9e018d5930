//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Default config location, used when it exists and no path is given.
pub(crate) const DEFAULT_CONFIG_PATH: &str = "config/cavern.toml";

/// Start the mock cluster.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Bind address for every node.
    #[arg(long)]
    pub bind: Option<String>,

    /// KV port of the first node.
    #[arg(long)]
    pub kv_port: Option<u16>,

    /// Management port of the first node.
    #[arg(long)]
    pub http_port: Option<u16>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Load the config at `path`, or the default file, or built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::from_file(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}

/// Run the start command.
pub async fn run_start(
    args: StartArgs,
    config_path: Option<&Path>,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        bind: args.bind,
        kv_port_base: args.kv_port,
        http_port_base: args.http_port,
    });
    config.validate().context("invalid configuration")?;

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
