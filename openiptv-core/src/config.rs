use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub timeshift: TimeshiftConfig,
    pub recording: RecordingConfig,
    pub logging: LoggingConfig,
}

/// Account used to reach the tuner/DVR server.
///
/// Passed explicitly into the input service; nothing reads account data from
/// process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9982,
            username: String::new(),
            password: String::new(),
            client_name: "OpenIPTV".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Client name announced for subscription connections
    #[must_use]
    pub fn subscription_client_name(&self) -> String {
        format!("{}_Subscription", self.client_name)
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeshiftConfig {
    /// Upper bound on how long a seek waits for the server to confirm the skip
    pub seek_ack_timeout_ms: u64,
    /// Period of the emulated-rewind timer
    pub rewind_tick_ms: u64,
    /// Timeshift buffer period requested when subscribing (seconds)
    pub timeshift_period_secs: u32,
    /// Bytes kept in the read buffer before the oldest data is dropped
    pub max_buffered_bytes: usize,
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            seek_ack_timeout_ms: 500,
            rewind_tick_ms: 250,
            timeshift_period_secs: 3600,
            max_buffered_bytes: 16 * 1024 * 1024,
        }
    }
}

impl TimeshiftConfig {
    #[must_use]
    pub const fn seek_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_ack_timeout_ms)
    }

    #[must_use]
    pub const fn rewind_tick(&self) -> Duration {
        Duration::from_millis(self.rewind_tick_ms)
    }
}

/// Endpoint and fixed credential used to play recorded assets over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9981/dvrfile/".to_string(),
            username: "development".to_string(),
            password: "development".to_string(),
            user_agent: "OpenIPTV".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // OPENIPTV__CONNECTION__HOST, OPENIPTV__TIMESHIFT__REWIND_TICK_MS, ...
        builder = builder.add_source(
            Environment::with_prefix("OPENIPTV")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the player cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeshift.rewind_tick_ms == 0 {
            return Err(ConfigError::Message("timeshift.rewind_tick_ms must be positive".into()));
        }
        if self.timeshift.max_buffered_bytes == 0 {
            return Err(ConfigError::Message("timeshift.max_buffered_bytes must be positive".into()));
        }
        if !self.recording.base_url.ends_with('/') {
            return Err(ConfigError::Message(format!(
                "recording.base_url must end with '/': {}",
                self.recording.base_url
            )));
        }
        Ok(())
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
