//! Config command implementation.

use super::start::{load_config, DEFAULT_CONFIG_PATH};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path; falls back to `--config`, then `config/cavern.toml`.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print configuration with defaults filled in.
    Show {
        /// Config file path; falls back to `--config`, then built-in defaults.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command. `config_path` is the global `--config` flag.
pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { file } => {
            let path = file
                .or_else(|| config_path.map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
            validate_config(&path)
        }
        ConfigCommand::Show { file, format } => {
            show_config(file.or_else(|| config_path.map(Path::to_path_buf)), &format)
        }
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = load_config(Some(path))?;
    println!("✓ Config file is valid");
    println!("  nodes: {}", config.nodes.len());
    println!("  buckets: {}", config.buckets.len());
    Ok(())
}

fn show_config(path: Option<PathBuf>, format: &str) -> Result<()> {
    let config = load_config(path.as_deref())?;
    let rendered = match format {
        "toml" => toml::to_string_pretty(&config)?,
        "json" => serde_json::to_string_pretty(&config)?,
        other => anyhow::bail!("unsupported format: {} (expected toml or json)", other),
    };
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_missing_file() {
        let err = validate_config(Path::new("/nonexistent/cavern.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_validate_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[buckets]]\nname = \"travel-sample\"").unwrap();
        validate_config(file.path()).unwrap();
    }

    #[test]
    fn test_validate_uses_global_config_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[telemetry]\nlog_level = \"loud\"").unwrap();

        let args = ConfigArgs {
            command: ConfigCommand::Validate { file: None },
        };
        let err = run_config(args, Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("log_level"));
    }

    #[test]
    fn test_show_rejects_unknown_format() {
        assert!(show_config(None, "yaml").is_err());
    }
}
