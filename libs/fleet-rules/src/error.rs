//! Rule Engine Error Types

use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Sample does not carry the field a rule watches
    #[error("Field '{field}' missing for rule {rule_id}")]
    MissingField { rule_id: String, field: String },

    /// Action execution error
    #[error("Action execution error: {0}")]
    ActionError(String),
}
