//! Error types and handling for Takoden
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Takoden operations
pub type Result<T> = std::result::Result<T, TakodenError>;

/// Main error type for Takoden
#[derive(Debug, Error)]
pub enum TakodenError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Login or token refresh exhausted its retries
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// API/transport failure after retries
    #[error("Fetch error: {message}")]
    Fetch { message: String },

    /// Malformed upstream data (e.g. a negative consumption reading)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Not enough elapsed data to derive a figure
    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    /// A single upstream field was absent; only the named sensor is affected
    #[error("Missing data for sensor {sensor}: {message}")]
    MissingData { sensor: String, message: String },

    /// Network-level errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl TakodenError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        TakodenError::Config {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        TakodenError::Auth {
            message: message.into(),
        }
    }

    /// Create a new fetch error
    pub fn fetch<S: Into<String>>(message: S) -> Self {
        TakodenError::Fetch {
            message: message.into(),
        }
    }

    /// Create a new invalid-data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        TakodenError::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new insufficient-data error
    pub fn insufficient_data<S: Into<String>>(message: S) -> Self {
        TakodenError::InsufficientData {
            message: message.into(),
        }
    }

    /// Create a new missing-data error for a specific sensor
    pub fn missing_data<S: Into<String>>(sensor: S, message: S) -> Self {
        TakodenError::MissingData {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        TakodenError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        TakodenError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        TakodenError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        TakodenError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        TakodenError::Generic {
            message: message.into(),
        }
    }

    /// Whether this error denotes an expired/invalid bearer token
    pub fn is_auth(&self) -> bool {
        matches!(self, TakodenError::Auth { .. })
    }
}

impl From<std::io::Error> for TakodenError {
    fn from(err: std::io::Error) -> Self {
        TakodenError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for TakodenError {
    fn from(err: serde_yaml::Error) -> Self {
        TakodenError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TakodenError {
    fn from(err: serde_json::Error) -> Self {
        TakodenError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for TakodenError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TakodenError::timeout(err.to_string())
        } else {
            TakodenError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for TakodenError {
    fn from(err: chrono::ParseError) -> Self {
        TakodenError::Validation {
            field: "datetime".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TakodenError::config("test config error");
        assert!(matches!(err, TakodenError::Config { .. }));

        let err = TakodenError::auth("token refresh failed");
        assert!(err.is_auth());

        let err = TakodenError::validation("field", "test validation error");
        assert!(matches!(err, TakodenError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = TakodenError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = TakodenError::missing_data("balance", "absent in API response");
        assert_eq!(
            format!("{}", err),
            "Missing data for sensor balance: absent in API response"
        );

        let err = TakodenError::validation("poll_interval_minutes", "must be positive");
        assert_eq!(
            format!("{}", err),
            "Validation error: poll_interval_minutes - must be positive"
        );
    }
}
