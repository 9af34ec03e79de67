//! Tunnel configuration.
//!
//! Values come from, highest precedence first: command-line flags, `ST_*`
//! environment variables, the YAML config file, and built-in defaults.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::TunnelError;

/// Default backoff multiplier between sentinel reconnection attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Default number of sentinel reconnection attempts per resolution.
pub const DEFAULT_RETRY_COUNT: u32 = 5;

/// Default listen address for the health server.
pub const DEFAULT_HTTP_ADDR: &str = ":6060";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// A logical database exposed on a local port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseRoute {
    /// Master name as known to Sentinel.
    pub name: String,
    /// Local port the tunnel listens on for this database.
    pub local_port: u16,
}

impl DatabaseRoute {
    pub fn new(name: impl Into<String>, local_port: u16) -> Self {
        Self {
            name: name.into(),
            local_port,
        }
    }
}

impl FromStr for DatabaseRoute {
    type Err = TunnelError;

    /// Parse `name:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, port) = s.rsplit_once(':').ok_or_else(|| {
            TunnelError::Config(format!("database '{s}' must be in name:port form"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TunnelError::Config(format!("database '{s}' has an empty name")));
        }
        Ok(Self::new(name, parse_port(name, port.trim())?))
    }
}

impl fmt::Display for DatabaseRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.local_port)
    }
}

fn parse_port(name: &str, raw: &str) -> Result<u16, TunnelError> {
    raw.parse().map_err(|_| {
        TunnelError::Config(format!("database '{name}' has an invalid local port '{raw}'"))
    })
}

/// Resolved tunnel configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sentinel endpoints in fallback order.
    pub sentinels: Vec<String>,

    /// Sentinel password, sent with `AUTH` before every query.
    pub password: Option<String>,

    /// Databases to expose.
    pub databases: Vec<DatabaseRoute>,

    /// Backoff multiplier between reconnection attempts.
    pub retry_backoff: Duration,

    /// Reconnection attempts per resolution.
    pub retry_count: u32,

    /// Health server listen address.
    pub http_addr: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Build the configuration from parsed command-line arguments.
    ///
    /// Reads the config file named on the command line, if any, and layers
    /// flags and environment variables on top of it.
    pub fn load(cli: Cli) -> Result<Self, TunnelError> {
        let file = match cli.config_path() {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// Parse a YAML config document without command-line overrides.
    pub fn from_yaml(contents: &str) -> Result<Self, TunnelError> {
        Self::merge(Cli::default(), FileConfig::parse(contents)?)
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self, TunnelError> {
        let sentinels = if cli.sentinels.is_empty() {
            file.sentinels_addresses_list
        } else {
            cli.sentinels
        };

        let databases = if cli.databases.is_empty() {
            file.databases
                .into_iter()
                .map(FileDatabase::into_route)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            cli.databases
        };

        let retry_backoff = match (cli.retry_backoff, file.retry_backoff) {
            (Some(backoff), _) => backoff,
            (None, Some(value)) => value.into_duration()?,
            (None, None) => DEFAULT_RETRY_BACKOFF,
        };

        let http_addr = cli
            .http_addr
            .or(file.http_addr)
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());

        let config = Self {
            sentinels: sentinels
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            password: cli.password.or(file.password).filter(|p| !p.is_empty()),
            databases,
            retry_backoff,
            retry_count: cli
                .retry_count
                .or(file.retry_count)
                .unwrap_or(DEFAULT_RETRY_COUNT),
            http_addr: normalize_listen_addr(&http_addr),
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the tunnel relies on.
    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.sentinels.is_empty() {
            return Err(TunnelError::Config(
                "at least one sentinel address is required".to_string(),
            ));
        }
        if self.databases.is_empty() {
            return Err(TunnelError::Config(
                "at least one database is required".to_string(),
            ));
        }
        for db in &self.databases {
            if db.name.is_empty() {
                return Err(TunnelError::Config("database name cannot be empty".to_string()));
            }
        }
        for (i, db) in self.databases.iter().enumerate() {
            let clash = self.databases[..i]
                .iter()
                .any(|other| other.local_port == db.local_port && db.local_port != 0);
            if clash {
                return Err(TunnelError::Config(format!(
                    "local port {} is used by more than one database",
                    db.local_port
                )));
            }
        }
        Ok(())
    }
}

/// `:6060` means all interfaces.
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Parse a duration string like "250ms", "1.5s", "2m" or "1h".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, nanos_per_unit) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1e6)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1e9)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60e9)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600e9)
    } else if s == "0" {
        ("0", 1.0)
    } else {
        return Err(format!("invalid duration '{s}': missing unit (ms, s, m, h)"));
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid duration '{s}'"));
    }

    Ok(Duration::from_nanos((value * nanos_per_unit).round() as u64))
}

/// On-disk configuration.
///
/// Field aliases accept the PascalCase and camelCase keys written by earlier
/// releases of the tunnel.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(
        alias = "SentinelsAddressesList",
        alias = "sentinelsAddressesList",
        alias = "sentinels"
    )]
    sentinels_addresses_list: Vec<String>,

    #[serde(alias = "Password")]
    password: Option<String>,

    #[serde(alias = "Databases")]
    databases: Vec<FileDatabase>,

    #[serde(alias = "RetryBackoff", alias = "retryBackoff")]
    retry_backoff: Option<DurationValue>,

    #[serde(alias = "RetryCount", alias = "retryCount")]
    retry_count: Option<u32>,

    #[serde(alias = "HTTPAddr", alias = "httpAddr")]
    http_addr: Option<String>,

    #[serde(alias = "LogLevel", alias = "logLevel")]
    log_level: Option<String>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, TunnelError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self, TunnelError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| TunnelError::Config(format!("failed to parse config: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct FileDatabase {
    #[serde(alias = "Name")]
    name: String,

    #[serde(alias = "LocalPort", alias = "localPort")]
    local_port: PortValue,
}

impl FileDatabase {
    fn into_route(self) -> Result<DatabaseRoute, TunnelError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(TunnelError::Config("database name cannot be empty".to_string()));
        }
        let local_port = match self.local_port {
            PortValue::Number(port) => port,
            PortValue::Text(raw) => parse_port(&name, raw.trim())?,
        };
        Ok(DatabaseRoute::new(name, local_port))
    }
}

/// Ports appear both quoted and bare in existing config files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

/// A duration string, or an integer number of nanoseconds (legacy format).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Nanos(u64),
    Text(String),
}

impl DurationValue {
    fn into_duration(self) -> Result<Duration, TunnelError> {
        match self {
            DurationValue::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
            DurationValue::Text(raw) => parse_duration(&raw).map_err(TunnelError::Config),
        }
    }
}
