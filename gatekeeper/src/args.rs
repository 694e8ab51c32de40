//! Command line of the gatekeeper binary.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, anyhow};
use clap::{Parser, ValueEnum};
use config::Config;
use log::LevelFilter;
use logforth::filter::EnvFilter;

/// Looked up in the working directory when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "gatekeeper.toml";

/// Crates whose logs follow the level given with `--log`. Everything else logs warnings only.
const OWN_CRATES: [&str; 4] = ["gatekeeper", "server", "rate_limit", "config"];

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Request-rate admission control for HTTP operations")]
pub(crate) struct Args {
    /// Address to listen on, overriding `server.listen_address`. Default: 127.0.0.1:8000
    #[arg(short, long, env = "GATEKEEPER_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Configuration file. Without it, ./gatekeeper.toml is used when present.
    #[arg(short, long, env = "GATEKEEPER_CONFIG_PATH")]
    pub config: Option<PathBuf>,
    /// A level (`info`, `debug`, ...) for Gatekeeper's own logs, or a full filter such as
    /// `warn,rate_limit=trace`.
    #[arg(long = "log", env = "GATEKEEPER_LOG", default_value = "info")]
    pub log: String,
    /// Log output format.
    #[arg(long, env = "GATEKEEPER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
    /// Validate the configuration, list the protected operations and exit.
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    /// One line per record, levels colored on a terminal
    Text,
    /// One JSON object per record
    Json,
}

impl Args {
    /// Loads and validates the configuration. A missing default file means an empty
    /// configuration, a missing explicit file is an error.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        if let Some(path) = &self.config {
            return Config::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()));
        }

        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Config::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("Failed to load configuration from {DEFAULT_CONFIG_PATH}"));
        }

        log::warn!("No {DEFAULT_CONFIG_PATH} in the working directory, starting without protected operations");

        Ok(Config::default())
    }

    pub fn log_filter(&self) -> anyhow::Result<EnvFilter> {
        let directives = match LevelFilter::from_str(&self.log) {
            Ok(LevelFilter::Off) => "off".to_string(),
            Ok(level) => {
                let level = level.as_str().to_ascii_lowercase();

                OWN_CRATES
                    .iter()
                    .fold("warn".to_string(), |directives, krate| format!("{directives},{krate}={level}"))
            }
            Err(_) => self.log.clone(),
        };

        EnvFilter::from_str(&directives).map_err(|_| anyhow!("Invalid log filter '{directives}'"))
    }
}
