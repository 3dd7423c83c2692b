//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use confsync_reconciler::ControllerConfig;

/// confsync - keeps a derived config artifact in sync with every ConfigSpec
#[derive(Parser, Debug)]
#[command(name = "confsync")]
#[command(version)]
#[command(about = "Keeps one config artifact in sync with every ConfigSpec record")]
#[command(
    long_about = "confsync watches ConfigSpec records, validates their YAML payload and maintains a <name>-config artifact for each one, cleaning it up when the record is deleted."
)]
pub struct Cli {
    /// Controller config file (TOML, or JSON by extension)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of ConfigSpec manifests to seed the store with
    #[arg(short, long)]
    pub manifests: Option<PathBuf>,

    /// Only reconcile records in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Number of reconciliation workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Resync interval in seconds (0 disables resync)
    #[arg(long)]
    pub resync_secs: Option<u64>,
}

impl Cli {
    /// Resolve the controller configuration.
    ///
    /// Layers, lowest first: defaults or the config file, `CONFSYNC_*`
    /// environment variables, then command-line flags.
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let base = match &self.config {
            Some(path) => ControllerConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ControllerConfig::default(),
        };

        let mut config = base.with_env_overrides();
        if let Some(namespace) = &self.namespace {
            config = config.namespace(namespace.clone());
        }
        if let Some(workers) = self.workers {
            config = config.workers(workers);
        }
        if let Some(secs) = self.resync_secs {
            config = config.resync_interval(Duration::from_secs(secs));
        }

        config.validate().context("Invalid controller configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from(["confsync", "--workers", "4", "--namespace", "prod", "--resync-secs", "0"]);
        let config = cli.controller_config().unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.namespace.as_deref(), Some("prod"));
        assert!(config.resync_interval.is_zero());
    }

    #[test]
    fn test_invalid_flags_rejected() {
        let cli = Cli::parse_from(["confsync", "--workers", "0"]);
        assert!(cli.controller_config().is_err());
    }

    #[test]
    fn test_missing_config_file_reports_path() {
        let cli = Cli::parse_from(["confsync", "--config", "/nonexistent/confsync.toml"]);
        let err = cli.controller_config().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/confsync.toml"));
    }
}
