//! Unified error handling for chowfan
//!
//! A single error type shared by the controller library and the daemon binary.
//! Sensor and device failures get their own variants because the control loop
//! treats them differently: a failed read skips a tick, a failed write is
//! retried and eventually ends the run.

use std::io;
use std::path::PathBuf;

/// Result type alias using ChowfanError
pub type Result<T> = std::result::Result<T, ChowfanError>;

/// Unified error type for all chowfan operations
#[derive(thiserror::Error, Debug)]
pub enum ChowfanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Sensor source unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Failed to write fan device {path}: {reason}")]
    DeviceWrite {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Generic(String),
}

impl ChowfanError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn sensor_unavailable(msg: impl Into<String>) -> Self {
        Self::SensorUnavailable(msg.into())
    }

    pub fn device_write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DeviceWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// True for failures of the sensor side of the loop
    pub fn is_sensor_failure(&self) -> bool {
        matches!(self, Self::SensorUnavailable(_))
    }

    /// True for failures of the fan device side of the loop
    pub fn is_device_failure(&self) -> bool {
        matches!(self, Self::DeviceWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_write_display() {
        let err = ChowfanError::device_write("/proc/acpi/ibm/fan", "permission denied");
        assert_eq!(
            err.to_string(),
            "Failed to write fan device /proc/acpi/ibm/fan: permission denied"
        );
        assert!(err.is_device_failure());
        assert!(!err.is_sensor_failure());
    }

    #[test]
    fn test_sensor_unavailable_display() {
        let err = ChowfanError::sensor_unavailable("sensors exited with status 1");
        assert_eq!(err.to_string(), "Sensor source unavailable: sensors exited with status 1");
        assert!(err.is_sensor_failure());
    }

    #[test]
    fn test_invalid_config_display() {
        let err = ChowfanError::invalid_config("max_fan_level", "must be at most 7");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for max_fan_level: must be at most 7"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: ChowfanError = io_err.into();
        assert!(matches!(err, ChowfanError::Io(_)));
    }
}
