//! Configuration for Postwatch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Connection-attempt rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Encryption key storage
    #[serde(default)]
    pub keys: KeyStoreConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum unseen messages examined per run; the rest stay unread for
    /// the next run
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Connection attempts per run before the run fails
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Mailbox folder to poll when a config does not name one
    #[serde(default = "default_folder")]
    pub default_folder: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            connect_retries: default_connect_retries(),
            default_folder: default_folder(),
        }
    }
}

fn default_batch_limit() -> usize {
    50
}

fn default_connect_retries() -> u32 {
    3
}

fn default_folder() -> String {
    "INBOX".to_string()
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Connection attempts allowed per owner per minute
    #[serde(default = "default_attempts_per_minute")]
    pub max_attempts_per_minute: usize,

    /// Connection attempts allowed per owner per hour
    #[serde(default = "default_attempts_per_hour")]
    pub max_attempts_per_hour: usize,

    /// Consecutive failures tolerated before exponential blocking starts
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Base block duration in seconds
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Maximum block duration in seconds
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_minute: default_attempts_per_minute(),
            max_attempts_per_hour: default_attempts_per_hour(),
            max_failed_attempts: default_max_failed_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

fn default_attempts_per_minute() -> usize {
    10
}

fn default_attempts_per_hour() -> usize {
    60
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    60
}

fn default_backoff_max_secs() -> u64 {
    3600
}

/// Encryption key storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Directory holding the current key file and the key archive
    #[serde(default = "default_key_path")]
    pub path: PathBuf,

    /// Days a key stays current before rotation
    #[serde(default = "default_rotation_days")]
    pub rotation_days: i64,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            path: default_key_path(),
            rotation_days: default_rotation_days(),
        }
    }
}

fn default_key_path() -> PathBuf {
    PathBuf::from("/var/lib/postwatch/keys")
}

fn default_rotation_days() -> i64 {
    30
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between full polling passes over active mailbox configs
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to pause between configs within one pass, to avoid
    /// hammering mail servers
    #[serde(default = "default_inter_config_delay_secs")]
    pub inter_config_delay_secs: u64,

    /// Days of records fed to each analysis run
    #[serde(default = "default_analysis_window_days")]
    pub analysis_window_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            inter_config_delay_secs: default_inter_config_delay_secs(),
            analysis_window_days: default_analysis_window_days(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    3600
}

fn default_inter_config_delay_secs() -> u64 {
    2
}

fn default_analysis_window_days() -> i64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/postwatch/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.batch_limit, 50);
        assert_eq!(ingest.connect_retries, 3);
        assert_eq!(ingest.default_folder, "INBOX");

        let rl = RateLimitConfig::default();
        assert_eq!(rl.max_attempts_per_minute, 10);
        assert_eq!(rl.max_attempts_per_hour, 60);
        assert_eq!(rl.max_failed_attempts, 5);
        assert_eq!(rl.backoff_base_secs, 60);
        assert_eq!(rl.backoff_max_secs, 3600);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
url = "postgres://localhost/postwatch"

[ingest]
batch_limit = 25

[scheduler]
poll_interval_secs = 600
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/postwatch");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.ingest.batch_limit, 25);
        assert_eq!(config.ingest.connect_retries, 3);
        assert_eq!(config.scheduler.poll_interval_secs, 600);
        assert_eq!(config.scheduler.inter_config_delay_secs, 2);
        assert_eq!(config.keys.rotation_days, 30);
    }
}
