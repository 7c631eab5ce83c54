//! Configuration system for spool-link
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (SPOOL_LINK_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::connection::{ManagerConfig, ReconnectPolicy};
use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Where the device lives
    pub device: DeviceSettings,

    /// Liveness and reconnect tuning
    pub connection: ConnectionSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Device endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Host (and optional port) serving the device web UI
    pub host: String,

    /// WebSocket endpoint path on that host
    pub path: String,

    /// Use wss:// instead of ws://
    pub tls: bool,
}

/// Connection liveness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Interval between heartbeat probes in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Silence after which the connection is declared dead, in milliseconds
    pub heartbeat_timeout_ms: u64,

    /// Delay before a reconnect attempt in milliseconds
    pub reconnect_delay_ms: u64,

    /// Upper bound for a single open attempt in milliseconds
    pub connect_timeout_ms: u64,

    /// "fixed" or "exponential"
    pub reconnect_strategy: String,

    /// Ceiling for the exponential strategy in milliseconds
    pub max_reconnect_delay_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: "filaman.local".to_string(),
            path: "/ws".to_string(),
            tls: false,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 20_000,
            reconnect_delay_ms: 5_000,
            connect_timeout_ms: 5_000,
            reconnect_strategy: "fixed".to_string(),
            max_reconnect_delay_ms: 60_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl LinkConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("spool-link.toml"),
            dirs::config_dir()
                .map(|p| p.join("spool-link").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".spool-link").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/spool-link/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SPOOL_LINK_HOST") {
            self.device.host = val;
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_PATH") {
            self.device.path = val;
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_TLS") {
            self.device.tls = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("SPOOL_LINK_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.connection.heartbeat_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_HEARTBEAT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.heartbeat_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_RECONNECT_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.connection.reconnect_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_RECONNECT_STRATEGY") {
            self.connection.reconnect_strategy = val;
        }

        if let Ok(val) = std::env::var("SPOOL_LINK_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("SPOOL_LINK_LOG_JSON") {
            self.logging.json_format = parse_flag(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(Error::config_field_invalid("device.host", "host cannot be empty"));
        }
        if !self.device.path.starts_with('/') {
            return Err(Error::config_field_invalid(
                "device.path",
                format!("path '{}' must start with '/'", self.device.path),
            ));
        }
        self.endpoint()?;

        let conn = &self.connection;
        for (field, value) in [
            ("connection.heartbeat_interval_ms", conn.heartbeat_interval_ms),
            ("connection.heartbeat_timeout_ms", conn.heartbeat_timeout_ms),
            ("connection.reconnect_delay_ms", conn.reconnect_delay_ms),
            ("connection.connect_timeout_ms", conn.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::config_field_invalid(field, "must be greater than zero"));
            }
        }
        if conn.heartbeat_timeout_ms < conn.heartbeat_interval_ms {
            return Err(Error::config_field_invalid(
                "connection.heartbeat_timeout_ms",
                "must not be shorter than heartbeat_interval_ms",
            ));
        }
        match conn.reconnect_strategy.to_lowercase().as_str() {
            "fixed" => {}
            "exponential" => {
                if conn.max_reconnect_delay_ms < conn.reconnect_delay_ms {
                    return Err(Error::config_field_invalid(
                        "connection.max_reconnect_delay_ms",
                        "must not be shorter than reconnect_delay_ms",
                    ));
                }
            }
            other => {
                return Err(Error::config_field_invalid(
                    "connection.reconnect_strategy",
                    format!("unknown strategy '{}'. Must be one of: fixed, exponential", other),
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// WebSocket endpoint derived from the device settings
    pub fn endpoint(&self) -> Result<Url> {
        let scheme = if self.device.tls { "wss" } else { "ws" };
        let raw = format!("{}://{}{}", scheme, self.device.host.trim(), self.device.path);
        Url::parse(&raw).map_err(|e| {
            Error::config_field_invalid("device.host", format!("'{}' is not a valid endpoint: {}", raw, e))
        })
    }

    /// Runtime settings for the connection manager
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let conn = &self.connection;
        let reconnect = match conn.reconnect_strategy.to_lowercase().as_str() {
            "exponential" => ReconnectPolicy::Exponential {
                initial: Duration::from_millis(conn.reconnect_delay_ms),
                max: Duration::from_millis(conn.max_reconnect_delay_ms),
            },
            _ => ReconnectPolicy::Fixed(Duration::from_millis(conn.reconnect_delay_ms)),
        };

        Ok(ManagerConfig {
            heartbeat_interval: Duration::from_millis(conn.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(conn.heartbeat_timeout_ms),
            connect_timeout: Duration::from_millis(conn.connect_timeout_ms),
            reconnect,
            ..ManagerConfig::new(self.endpoint()?)
        })
    }
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".spool-link")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# spool-link configuration

[device]
# Host (and optional port) of the spool management device
host = "filaman.local"

# WebSocket endpoint path
path = "/ws"

# Use wss:// instead of ws://
tls = false

[connection]
# Heartbeat probe interval in milliseconds
heartbeat_interval_ms = 10000

# Silence (no inbound frame of any kind) before the link is declared dead
heartbeat_timeout_ms = 20000

# Delay before each reconnect attempt in milliseconds
reconnect_delay_ms = 5000

# Upper bound for a single connection attempt in milliseconds
connect_timeout_ms = 5000

# "fixed" retries forever at reconnect_delay_ms.
# "exponential" grows the delay up to max_reconnect_delay_ms, still retrying forever.
reconnect_strategy = "fixed"
max_reconnect_delay_ms = 60000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.spool-link/logs/spool-link.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.device.host, "filaman.local");
        assert_eq!(config.connection.heartbeat_interval_ms, 10_000);
        assert_eq!(config.connection.heartbeat_timeout_ms, 20_000);
        assert_eq!(config.connection.reconnect_delay_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint() {
        let mut config = LinkConfig::default();
        config.device.host = "192.168.1.40".to_string();
        assert_eq!(config.endpoint().unwrap().as_str(), "ws://192.168.1.40/ws");

        config.device.tls = true;
        config.device.host = "spools.example.com:8443".to_string();
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "wss://spools.example.com:8443/ws"
        );
    }

    #[test]
    fn test_env_override() {
        env::set_var("SPOOL_LINK_HOST", "10.0.0.7");
        env::set_var("SPOOL_LINK_RECONNECT_DELAY_MS", "2500");
        env::set_var("SPOOL_LINK_LOG_LEVEL", "debug");

        let mut config = LinkConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.device.host, "10.0.0.7");
        assert_eq!(config.connection.reconnect_delay_ms, 2500);
        assert_eq!(config.logging.level, "debug");

        env::remove_var("SPOOL_LINK_HOST");
        env::remove_var("SPOOL_LINK_RECONNECT_DELAY_MS");
        env::remove_var("SPOOL_LINK_LOG_LEVEL");
    }

    #[test]
    fn test_validation_empty_host() {
        let mut config = LinkConfig::default();
        config.device.host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_relative_path() {
        let mut config = LinkConfig::default();
        config.device.path = "ws".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_timeout_shorter_than_interval() {
        let mut config = LinkConfig::default();
        config.connection.heartbeat_timeout_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_interval() {
        let mut config = LinkConfig::default();
        config.connection.reconnect_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_unknown_strategy() {
        let mut config = LinkConfig::default();
        config.connection.reconnect_strategy = "jittered".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = LinkConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manager_config_fixed() {
        let manager = LinkConfig::default().manager_config().unwrap();
        assert_eq!(manager.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(manager.heartbeat_timeout, Duration::from_secs(20));
        assert_eq!(manager.reconnect, ReconnectPolicy::Fixed(Duration::from_secs(5)));
    }

    #[test]
    fn test_manager_config_exponential() {
        let mut config = LinkConfig::default();
        config.connection.reconnect_strategy = "exponential".to_string();
        let manager = config.manager_config().unwrap();
        assert_eq!(
            manager.reconnect,
            ReconnectPolicy::Exponential {
                initial: Duration::from_secs(5),
                max: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn test_default_config_file_parses() {
        let parsed: LinkConfig = toml::from_str(&generate_default_config()).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.device.path, "/ws");
    }

    #[test]
    fn test_parse_partial_config() {
        let config: LinkConfig = toml::from_str(
            r#"
[device]
host = "printer-room.lan"

[connection]
heartbeat_interval_ms = 5000
"#,
        )
        .unwrap();

        assert_eq!(config.device.host, "printer-room.lan");
        assert_eq!(config.device.path, "/ws");
        assert_eq!(config.connection.heartbeat_interval_ms, 5000);
        assert_eq!(config.connection.heartbeat_timeout_ms, 20_000);
        assert_eq!(config.logging.level, "info");
    }
}
