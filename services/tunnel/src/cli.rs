//! Command-line interface.
//!
//! Every flag can also be provided through an `ST_*` environment variable.
//! Flags and environment variables take precedence over the config file.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{parse_duration, DatabaseRoute};

/// Redis Sentinel tunnel - always reach the current primary on a fixed local port.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "sentinel-tunnel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (YAML).
    #[arg(short = 'c', long = "config", env = "ST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Config file path, positional form.
    #[arg(value_name = "CONFIG_FILE", conflicts_with = "config")]
    pub config_file: Option<PathBuf>,

    /// Comma-separated list of Sentinel addresses (host:port).
    #[arg(short = 's', long, env = "ST_SENTINELS", value_delimiter = ',')]
    pub sentinels: Vec<String>,

    /// Sentinel password.
    #[arg(short = 'p', long, env = "ST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Comma-separated list of databases to expose (name:local_port).
    #[arg(short = 'd', long, env = "ST_DATABASES", value_delimiter = ',')]
    pub databases: Vec<DatabaseRoute>,

    /// Backoff multiplier for reconnection attempts (e.g. 250ms, 1s).
    #[arg(long, env = "ST_RETRY_BACKOFF", value_parser = parse_duration)]
    pub retry_backoff: Option<Duration>,

    /// Number of reconnection attempts.
    #[arg(long, env = "ST_RETRY_COUNT")]
    pub retry_count: Option<u32>,

    /// Listen address for the health server.
    #[arg(long, env = "ST_HTTP_ADDR")]
    pub http_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG wins when set.
    #[arg(long, env = "ST_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// The config file path, whichever form it was given in.
    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref().or(self.config_file.as_ref())
    }
}
