//! Configuration management for Takoden
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{Result, TakodenError};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kraken account credentials and endpoint
    pub account: AccountConfig,

    /// Polling cadence in minutes
    pub poll_interval_minutes: u64,

    /// Per-cycle timeout in seconds; a cycle exceeding this is abandoned
    pub cycle_timeout_seconds: u64,

    /// Timezone for month and day boundaries
    pub timezone: String,

    /// HTTP transport tuning
    pub transport: TransportConfig,

    /// Token lifecycle tuning
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Kraken account credentials and endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Account email address
    pub email: String,

    /// Account password
    pub password: String,

    /// GraphQL endpoint URL
    pub api_url: String,

    /// Account number; discovered via the API when empty
    pub account_number: String,
}

/// HTTP transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Max retry attempts on transport failure (network, 5xx)
    pub max_retries: u32,

    /// Initial backoff between retries in milliseconds; doubles per attempt
    pub retry_backoff_ms: u64,
}

/// Token lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Refresh the token when fewer than this many minutes of life remain
    pub refresh_margin_minutes: u64,

    /// Assumed access-token lifetime when the API does not state one
    pub token_lifetime_minutes: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (or directory for rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    #[serde(default = "default_true")]
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            api_url: "https://api.oejp-kraken.energy/v1/graphql/".to_string(),
            account_number: String::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_margin_minutes: 10,
            token_lifetime_minutes: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/takoden.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: AccountConfig::default(),
            poll_interval_minutes: 30,
            cycle_timeout_seconds: 60,
            timezone: "Asia/Tokyo".to_string(),
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "takoden_config.yaml",
            "/data/takoden_config.yaml",
            "/etc/takoden/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.account.email.is_empty() {
            return Err(TakodenError::validation(
                "account.email",
                "Email cannot be empty",
            ));
        }

        if self.account.password.is_empty() {
            return Err(TakodenError::validation(
                "account.password",
                "Password cannot be empty",
            ));
        }

        if self.account.api_url.is_empty() {
            return Err(TakodenError::validation(
                "account.api_url",
                "API URL cannot be empty",
            ));
        }

        if self.poll_interval_minutes == 0 {
            return Err(TakodenError::validation(
                "poll_interval_minutes",
                "Must be greater than 0",
            ));
        }

        if self.cycle_timeout_seconds == 0 {
            return Err(TakodenError::validation(
                "cycle_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.transport.request_timeout_seconds == 0 {
            return Err(TakodenError::validation(
                "transport.request_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.auth.token_lifetime_minutes <= self.auth.refresh_margin_minutes {
            return Err(TakodenError::validation(
                "auth.refresh_margin_minutes",
                "Refresh margin must be smaller than the token lifetime",
            ));
        }

        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| TakodenError::validation("timezone", "Unknown timezone name"))?;

        Ok(())
    }

    /// Resolved timezone; falls back to Asia/Tokyo if the name is invalid
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or(chrono_tz::Asia::Tokyo)
    }
}
