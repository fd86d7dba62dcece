//! Command-line interface.
//!
//! Flags override the matching fields of the config file (or of the defaults
//! when no file is given); the merged result is validated once.

use clap::Parser;
use std::path::PathBuf;

use crate::config::validation::validate_config;
use crate::config::{load_config, ConfigError, ProxyConfig};

#[derive(Debug, Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Minimal HTTP forward proxy", long_about = None)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Cache directory (reserved, not written to)
    #[arg(short = 'd', long)]
    pub cache_dir: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub silent: bool,

    /// Host name or address to bind
    #[arg(short, long)]
    pub bind: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Build the effective configuration.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(host) = self.bind {
            config.listener.bind_host = host;
        }
        if let Some(dir) = self.cache_dir {
            config.cache.path = dir;
        }
        if self.silent {
            config.observability.silent = true;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}
