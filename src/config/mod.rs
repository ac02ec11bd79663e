//! Server configuration.
//!
//! Configuration is loaded from environment variables with optional YAML
//! overrides. Priority: YAML > ENV vars > .env values > defaults. The `.env`
//! file itself is loaded in `main.rs` at startup, so by the time this module
//! runs, `.env` values are plain environment variables.
//!
//! # Example
//! ```rust,no_run
//! use sonic_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), sonic_bridge::config::ConfigError> {
//! // Environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML in config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Server configuration.
///
/// Covers the listen address, the framing engine, the per-call output queue,
/// the connection gate's rate limiting, and CORS.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Outbound frame size in bytes (samples, at one byte per sample)
    pub frame_size: usize,
    /// Interval between outbound frames, in milliseconds
    pub frame_interval_ms: u64,
    /// Cap on buffered outbound audio, in milliseconds of 8 kHz audio.
    /// `None` disables the cap.
    pub max_buffer_ms: Option<u64>,

    /// Capacity of the per-call output queue, in chunks
    pub output_queue_capacity: usize,

    /// Accepted connections per source per rate-limit window
    pub rate_limit_max_connections: u32,
    /// Rate-limit window length in milliseconds
    pub rate_limit_window_ms: u64,

    /// CORS allowed origins (comma-separated list or "*" for all).
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            frame_size: 160,
            frame_interval_ms: 20,
            max_buffer_ms: Some(5000),
            output_queue_capacity: 256,
            rate_limit_max_connections: 10,
            rate_limit_window_ms: 60_000,
            cors_allowed_origins: None,
        }
    }
}

/// YAML overlay: every field optional, applied over the env-derived base.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlConfig {
    host: Option<String>,
    port: Option<u16>,
    frame_size: Option<usize>,
    frame_interval_ms: Option<u64>,
    max_buffer_ms: Option<u64>,
    output_queue_capacity: Option<usize>,
    rate_limit_max_connections: Option<u32>,
    rate_limit_window_ms: Option<u64>,
    cors_allowed_origins: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables over defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = read_env("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_env("PORT")? {
            config.port = port;
        }
        if let Some(frame_size) = parse_env("FRAME_SIZE")? {
            config.frame_size = frame_size;
        }
        if let Some(interval) = parse_env("FRAME_INTERVAL_MS")? {
            config.frame_interval_ms = interval;
        }
        if let Some(max_buffer) = parse_env("MAX_BUFFER_MS")? {
            // 0 disables the cap
            config.max_buffer_ms = if max_buffer == 0 {
                None
            } else {
                Some(max_buffer)
            };
        }
        if let Some(capacity) = parse_env("OUTPUT_QUEUE_CAPACITY")? {
            config.output_queue_capacity = capacity;
        }
        if let Some(max) = parse_env("RATE_LIMIT_MAX_CONNECTIONS")? {
            config.rate_limit_max_connections = max;
        }
        if let Some(window) = parse_env("RATE_LIMIT_WINDOW_MS")? {
            config.rate_limit_window_ms = window;
        }
        if let Some(origins) = read_env("CORS_ALLOWED_ORIGINS") {
            config.cors_allowed_origins = Some(origins);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let yaml: YamlConfig = serde_yaml::from_str(&contents)?;

        let mut config = Self::from_env()?;
        if let Some(host) = yaml.host {
            config.host = host;
        }
        if let Some(port) = yaml.port {
            config.port = port;
        }
        if let Some(frame_size) = yaml.frame_size {
            config.frame_size = frame_size;
        }
        if let Some(interval) = yaml.frame_interval_ms {
            config.frame_interval_ms = interval;
        }
        if let Some(max_buffer) = yaml.max_buffer_ms {
            config.max_buffer_ms = if max_buffer == 0 {
                None
            } else {
                Some(max_buffer)
            };
        }
        if let Some(capacity) = yaml.output_queue_capacity {
            config.output_queue_capacity = capacity;
        }
        if let Some(max) = yaml.rate_limit_max_connections {
            config.rate_limit_max_connections = max;
        }
        if let Some(window) = yaml.rate_limit_window_ms {
            config.rate_limit_window_ms = window;
        }
        if let Some(origins) = yaml.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_size == 0 {
            return Err(ConfigError::invalid("frame_size", "must be at least 1"));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "frame_interval_ms",
                "must be at least 1",
            ));
        }
        if self.output_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "output_queue_capacity",
                "must be at least 1",
            ));
        }
        if self.rate_limit_window_ms == 0 {
            return Err(ConfigError::invalid(
                "rate_limit_window_ms",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match read_env(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, format!("{e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_KEYS: &[&str] = &[
        "HOST",
        "PORT",
        "FRAME_SIZE",
        "FRAME_INTERVAL_MS",
        "MAX_BUFFER_MS",
        "OUTPUT_QUEUE_CAPACITY",
        "RATE_LIMIT_MAX_CONNECTIONS",
        "RATE_LIMIT_WINDOW_MS",
        "CORS_ALLOWED_ORIGINS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.frame_size, 160);
        assert_eq!(config.frame_interval_ms, 20);
        assert_eq!(config.max_buffer_ms, Some(5000));
        assert_eq!(config.output_queue_capacity, 256);
        assert_eq!(config.rate_limit_max_connections, 10);
        assert_eq!(config.rate_limit_window_ms, 60_000);
        assert!(config.cors_allowed_origins.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("HOST", "127.0.0.1");
            env::set_var("PORT", "8080");
            env::set_var("FRAME_SIZE", "320");
            env::set_var("MAX_BUFFER_MS", "0");
        }
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.frame_size, 320);
        // 0 disables the buffering cap
        assert_eq!(config.max_buffer_ms, None);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        unsafe { env::set_var("PORT", "not-a-number") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        unsafe {
            env::set_var("PORT", "8080");
            env::set_var("FRAME_SIZE", "320");
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "port: 9090\nrate_limit_max_connections: 5\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        // YAML wins over env
        assert_eq!(config.port, 9090);
        // Env value kept where YAML is silent
        assert_eq!(config.frame_size, 320);
        assert_eq!(config.rate_limit_max_connections, 5);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_rejects_unknown_fields() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "port: 9090\nunknown_knob: true\n").unwrap();

        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_zero_frame_size() {
        clear_env();
        unsafe { env::set_var("FRAME_SIZE", "0") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "frame_size"));
        clear_env();
    }

    #[test]
    fn test_address() {
        let config = ServerConfig {
            host: "localhost".to_string(),
            port: 4000,
            ..Default::default()
        };
        assert_eq!(config.address(), "localhost:4000");
    }
}
