//! Configuration management.
//!
//! Handles loading configuration from TOML files and validating the
//! keep-alive interval.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mcp::{ConnectionParams, ToolsetConfig};

/// Default keep-alive interval. Stays under the common 60s load balancer idle timeout.
pub const DEFAULT_PING_INTERVAL_SECONDS: f64 = 50.0;

/// Intervals at or above this no longer beat a typical idle timeout.
const IDLE_TIMEOUT_HINT_SECONDS: f64 = 60.0;

/// Intervals below this mostly add load.
const FLOOD_HINT_SECONDS: f64 = 1.0;

/// Local config file name.
pub const LOCAL_CONFIG_FILE: &str = ".mcp-keepalive.toml";

/// Error type for configuration problems.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid ping interval {0}s: must be a positive number of seconds")]
    InvalidPingInterval(f64),

    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),
}

/// Validated keep-alive interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingInterval(Duration);

impl PingInterval {
    /// Validate an interval given in seconds.
    ///
    /// Zero, negative, non-finite and unrepresentable values are rejected.
    /// Values that are valid but unlikely to be useful are logged at `warn`.
    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::InvalidPingInterval(secs));
        }
        let duration =
            Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidPingInterval(secs))?;
        if duration.is_zero() {
            return Err(ConfigError::InvalidPingInterval(secs));
        }

        if secs >= IDLE_TIMEOUT_HINT_SECONDS {
            tracing::warn!(
                "Ping interval {:.1}s is not below a typical {:.0}s idle timeout; \
                 connections may still be dropped",
                secs,
                IDLE_TIMEOUT_HINT_SECONDS
            );
        } else if secs < FLOOD_HINT_SECONDS {
            tracing::warn!("Ping interval {:.3}s is very short and may flood the connection", secs);
        }

        Ok(Self(duration))
    }

    /// Validate an interval given as a duration.
    pub fn from_duration(duration: Duration) -> Result<Self, ConfigError> {
        Self::from_secs_f64(duration.as_secs_f64())
    }

    /// The interval as a duration.
    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// The interval in seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl Default for PingInterval {
    fn default() -> Self {
        Self(Duration::from_secs_f64(DEFAULT_PING_INTERVAL_SECONDS))
    }
}

impl TryFrom<f64> for PingInterval {
    type Error = ConfigError;

    fn try_from(secs: f64) -> Result<Self, Self::Error> {
        Self::from_secs_f64(secs)
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keep-alive settings
    pub keepalive: KeepAliveConfig,

    /// MCP servers to connect to
    pub servers: Vec<ServerEntry>,
}

/// Keep-alive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Seconds between pings on an open session
    pub ping_interval_secs: f64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self { ping_interval_secs: DEFAULT_PING_INTERVAL_SECONDS }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Server name (unique identifier)
    pub name: String,

    /// How to reach the server
    #[serde(flatten)]
    pub connection: ConnectionParams,

    /// Only expose these tools (all tools when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_filter: Option<Vec<String>>,

    /// Prefix prepended to exposed tool names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name_prefix: Option<String>,
}

impl ServerEntry {
    /// Create a new server entry.
    pub fn new(name: impl Into<String>, connection: ConnectionParams) -> Self {
        Self { name: name.into(), connection, tool_filter: None, tool_name_prefix: None }
    }

    /// Toolset settings for this server.
    pub fn toolset_config(&self, ping_interval_secs: f64) -> ToolsetConfig {
        ToolsetConfig {
            connection_params: self.connection.clone(),
            ping_interval: ping_interval_secs,
            tool_filter: self.tool_filter.clone(),
            tool_name_prefix: self.tool_name_prefix.clone(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.mcp-keepalive.toml` in current directory
    /// 2. `~/.config/mcp-keepalive/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// The file `load` reads: the local config if present, else the global one.
    pub fn config_path() -> Option<PathBuf> {
        locate(PathBuf::from(LOCAL_CONFIG_FILE), Self::global_config_path())
    }

    /// Location of the per-user config file, whether or not it exists.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the interval and server names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ping_interval()?;

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
        }
        Ok(())
    }

    /// The validated keep-alive interval.
    pub fn ping_interval(&self) -> Result<PingInterval, ConfigError> {
        PingInterval::from_secs_f64(self.keepalive.ping_interval_secs)
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Result<&ServerEntry, ConfigError> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::ServerNotFound(name.to_string()))
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(crate::APP_NAME))
    }
}

fn locate(local: PathBuf, global: Option<PathBuf>) -> Option<PathBuf> {
    if local.exists() {
        return Some(local);
    }
    global.filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{HttpConnectionParams, StdioConnectionParams};

    #[test]
    fn test_default_interval_is_below_idle_timeout() {
        assert!(DEFAULT_PING_INTERVAL_SECONDS < 60.0);
        assert!(DEFAULT_PING_INTERVAL_SECONDS > 0.0);
        assert_eq!(PingInterval::default().as_secs_f64(), DEFAULT_PING_INTERVAL_SECONDS);
    }

    #[test]
    fn test_rejects_non_positive_intervals() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::MAX] {
            assert!(PingInterval::from_secs_f64(secs).is_err(), "{} accepted", secs);
        }
        assert_eq!(PingInterval::try_from(-1.0), Err(ConfigError::InvalidPingInterval(-1.0)));
        assert!(PingInterval::from_duration(Duration::ZERO).is_err());
    }

    #[test]
    fn test_accepts_positive_intervals() {
        let interval = PingInterval::from_secs_f64(0.1).unwrap();
        assert_eq!(interval.as_duration(), Duration::from_millis(100));
        assert!(PingInterval::from_secs_f64(120.0).is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.keepalive.ping_interval_secs, DEFAULT_PING_INTERVAL_SECONDS);
        assert!(config.servers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_servers() {
        let config = Config::from_toml(
            r#"
            [keepalive]
            ping_interval_secs = 25.0

            [[servers]]
            name = "local"
            transport = "stdio"
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-everything"]

            [[servers]]
            name = "remote"
            transport = "http"
            url = "http://server:8000/mcp"
            tool_filter = ["search"]
            tool_name_prefix = "remote"

            [servers.headers]
            Authorization = "Bearer token"
            "#,
        )
        .unwrap();

        assert_eq!(config.ping_interval().unwrap().as_secs_f64(), 25.0);

        let local = config.server("local").unwrap();
        assert_eq!(
            local.connection,
            ConnectionParams::Stdio(
                StdioConnectionParams::new("npx")
                    .with_args(["-y", "@modelcontextprotocol/server-everything"])
            )
        );

        let remote = config.server("remote").unwrap();
        let ConnectionParams::Http(ref http) = remote.connection else {
            panic!("expected http transport");
        };
        assert_eq!(http.url, "http://server:8000/mcp");
        assert_eq!(http.headers.get("Authorization").map(String::as_str), Some("Bearer token"));
        assert_eq!(remote.tool_filter, Some(vec!["search".to_string()]));

        assert!(matches!(config.server("missing"), Err(ConfigError::ServerNotFound(_))));
    }

    #[test]
    fn test_invalid_interval_fails_load() {
        let err = Config::from_toml("[keepalive]\nping_interval_secs = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("Invalid ping interval"));
    }

    #[test]
    fn test_duplicate_server_names_rejected() {
        let mut config = Config::default();
        let entry = ServerEntry::new(
            "dup",
            ConnectionParams::Http(HttpConnectionParams::new("http://localhost/mcp")),
        );
        config.servers.push(entry.clone());
        config.servers.push(entry);
        assert_eq!(config.validate(), Err(ConfigError::DuplicateServer("dup".to_string())));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.servers.push(ServerEntry::new(
            "local",
            ConnectionParams::Stdio(StdioConnectionParams::new("mcp-server")),
        ));

        let text = config.to_toml().unwrap();
        assert!(text.contains("ping_interval_secs = 50.0"));
        assert!(text.contains("transport = \"stdio\""));

        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.servers[0].connection, config.servers[0].connection);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[keepalive]\nping_interval_secs = 10.0\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.keepalive.ping_interval_secs, 10.0);
    }

    #[test]
    fn test_local_config_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join(LOCAL_CONFIG_FILE);
        let global = dir.path().join("config.toml");
        std::fs::write(&local, "").unwrap();
        std::fs::write(&global, "").unwrap();

        assert_eq!(locate(local.clone(), Some(global.clone())), Some(local.clone()));

        std::fs::remove_file(&local).unwrap();
        assert_eq!(locate(local.clone(), Some(global.clone())), Some(global.clone()));

        std::fs::remove_file(&global).unwrap();
        assert_eq!(locate(local, Some(global)), None);
    }
}
