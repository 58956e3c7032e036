//! Unified error types for Lookout

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Lookout operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Camera errors
    #[error("Camera '{0}' not found")]
    CameraNotFound(String),

    #[error("Camera '{0}' already exists")]
    CameraExists(String),

    #[error("Invalid camera {field}: {message}")]
    InvalidIdentity { field: String, message: String },

    // Control unit errors
    #[error("Failed to write control unit '{path}': {source}")]
    UnitWrite { path: PathBuf, source: io::Error },

    #[error("Failed to read control unit '{path}': {source}")]
    UnitRead { path: PathBuf, source: io::Error },

    #[error("Malformed control unit '{path}': {message}")]
    UnitParse { path: PathBuf, message: String },

    // Log errors
    #[error("Log file '{path}' unavailable: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    // Schedule errors
    #[error("Invalid schedule rule '{0}'")]
    InvalidSchedule(String),

    // Process errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Relay for camera '{camera}' could not be started: {message}")]
    RelayLaunch { camera: String, message: String },

    // Output errors
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for identity validation failures
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Error::InvalidIdentity {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for Lookout operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_identity_message() {
        let err = Error::invalid("address", "must not be empty");
        assert_eq!(err.to_string(), "Invalid camera address: must not be empty");
    }
}
