//! Command-line interface.
//!
//! `modelgate` defaults to `serve`; `config validate` and `config show`
//! operate on the TOML without starting the server.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use mg_domain::config::Config;

pub const DEFAULT_CONFIG_PATH: &str = "modelgate.toml";
pub const CONFIG_ENV: &str = "MODELGATE_CONFIG";

#[derive(Parser)]
#[command(name = "modelgate", about = "Self-hosted local-model orchestration server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load the configuration: `--config` flag, then `MODELGATE_CONFIG`, then
/// `./modelgate.toml`. A missing file yields the defaults.
pub fn load_config(flag: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = flag
        .map(Path::to_owned)
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 3100);
    }

    #[test]
    fn flag_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelgate.toml");
        std::fs::write(&path, "[server]\nport = 4000\n").unwrap();
        let (config, used) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(used, path);
    }

    #[test]
    fn malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelgate.toml");
        std::fs::write(&path, "[server\nport=").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
