//! CLI command implementations.

mod config;
mod start;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use start::{load_config, run_start, StartArgs};
