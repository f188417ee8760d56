//! Threshold rules and their actions

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Default message for a `log` action without one
pub const DEFAULT_LOG_MESSAGE: &str = "No message provided";

/// Default message for a `publish_alert` action without one
pub const DEFAULT_ALERT_MESSAGE: &str = "Alert triggered";

/// Default pulse length for a `pulse_relay` action without one
pub const DEFAULT_PULSE: Duration = Duration::from_secs(1);

// ============================================================================
// Condition
// ============================================================================

/// Comparison operator between a telemetry value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Condition {
    /// Evaluate `value <op> threshold`
    #[allow(clippy::float_cmp)]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::Lt => value < threshold,
            Condition::Le => value <= threshold,
            Condition::Gt => value > threshold,
            Condition::Ge => value >= threshold,
            Condition::Eq => value == threshold,
            Condition::Ne => value != threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Condition::Lt => "<",
            Condition::Le => "<=",
            Condition::Gt => ">",
            Condition::Ge => ">=",
            Condition::Eq => "==",
            Condition::Ne => "!=",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Action
// ============================================================================

/// Action run when a rule crosses into the triggered state
///
/// Deserialised from `{"type": "...", ...}`. Unknown type names become
/// [`Action::Unknown`] so a bad action never rejects the whole rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Log {
        #[serde(default)]
        message: Option<String>,
    },
    RelayOn,
    RelayOff,
    PulseRelay {
        /// Seconds
        #[serde(default)]
        duration: Option<f64>,
    },
    #[serde(alias = "aws")]
    PublishAlert {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Log { .. } => "log",
            Action::RelayOn => "relay_on",
            Action::RelayOff => "relay_off",
            Action::PulseRelay { .. } => "pulse_relay",
            Action::PublishAlert { .. } => "publish_alert",
            Action::Unknown => "unknown",
        }
    }

    /// Effective pulse length; falls back to one second when absent or invalid
    pub fn pulse_duration(duration: Option<f64>) -> Duration {
        duration
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(DEFAULT_PULSE)
    }
}

// ============================================================================
// Rule
// ============================================================================

/// Threshold rule over one numeric telemetry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Telemetry key, e.g. "watts"
    pub field: String,
    pub condition: Condition,
    #[serde(alias = "value")]
    pub threshold: f64,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ModelError::Validation("rule id must not be empty".into()));
        }
        if self.field.trim().is_empty() {
            return Err(ModelError::Validation(format!(
                "rule {}: field must not be empty",
                self.id
            )));
        }
        if !self.threshold.is_finite() {
            return Err(ModelError::Validation(format!(
                "rule {}: threshold must be finite",
                self.id
            )));
        }
        Ok(())
    }
}
