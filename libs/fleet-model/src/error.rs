//! Model Error Types

use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Malformed `HH:MM` time
    #[error("Invalid time format: {0}")]
    InvalidTime(String),

    /// Schedule violates its invariants
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Sensor address is not a hex bus address
    #[error("Invalid sensor address: {0}")]
    InvalidAddress(String),

    /// Stream entry could not be converted into a sample
    #[error("Invalid telemetry entry: {0}")]
    InvalidEntry(String),

    /// Generic validation failure
    #[error("Validation error: {0}")]
    Validation(String),
}
