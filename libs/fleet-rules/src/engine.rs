//! Edge-triggered threshold rules engine
//!
//! One engine per relay. Each rule carries a `triggered` flag; actions run
//! only when a rule crosses from not-triggered to triggered, and a clear
//! notification (without actions) is sent when it crosses back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_model::rule::{DEFAULT_ALERT_MESSAGE, DEFAULT_LOG_MESSAGE};
use fleet_model::{Action, CloudGateway, Rule, TelemetrySample, ALERTS_TOPIC};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RuleError};

/// Relay control used by rule actions
///
/// Returns `true` when the relay state actually changed.
#[async_trait]
pub trait RelayActuation: Send + Sync + 'static {
    async fn set_on(&self, relay_id: &str) -> bool;
    async fn set_off(&self, relay_id: &str) -> bool;
    async fn pulse(&self, relay_id: &str, duration: Duration) -> bool;
}

/// Direction of a rule state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Start,
    Clear,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Start => "start",
            TransitionKind::Clear => "clear",
        }
    }
}

/// A rule crossing into or out of the triggered state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub rule_id: String,
    pub kind: TransitionKind,
    pub field: String,
    pub value: f64,
}

struct RuleSlot {
    rule: Rule,
    triggered: bool,
}

/// Rules engine for a single relay
pub struct RulesEngine {
    relay_id: String,
    slots: Vec<RuleSlot>,
    actuation: Arc<dyn RelayActuation>,
    gateway: Arc<dyn CloudGateway>,
}

impl RulesEngine {
    pub fn new(
        relay_id: impl Into<String>,
        rules: Vec<Rule>,
        actuation: Arc<dyn RelayActuation>,
        gateway: Arc<dyn CloudGateway>,
    ) -> Self {
        Self {
            relay_id: relay_id.into(),
            slots: rules
                .into_iter()
                .map(|rule| RuleSlot {
                    rule,
                    triggered: false,
                })
                .collect(),
            actuation,
            gateway,
        }
    }

    pub fn relay_id(&self) -> &str {
        &self.relay_id
    }

    pub fn rule_count(&self) -> usize {
        self.slots.len()
    }

    /// Current `triggered` flag of a rule, `None` for an unknown id
    pub fn is_triggered(&self, rule_id: &str) -> Option<bool> {
        self.slots
            .iter()
            .find(|s| s.rule.id == rule_id)
            .map(|s| s.triggered)
    }

    /// Evaluate every rule against `sample`, in declaration order
    ///
    /// A rule whose field is missing is skipped for this sample and keeps
    /// its state. Returns the transitions that happened.
    pub async fn evaluate(&mut self, sample: &TelemetrySample) -> Vec<Transition> {
        debug!(
            "Evaluating {} rules for relay {}",
            self.slots.len(),
            self.relay_id
        );

        let mut transitions = Vec::new();
        for index in 0..self.slots.len() {
            let value = match field_value(&self.slots[index].rule, sample) {
                Ok(value) => value,
                Err(e) => {
                    error!("Relay {}: {}, rule skipped", self.relay_id, e);
                    continue;
                },
            };

            let slot = &mut self.slots[index];
            let condition_met = slot.rule.condition.holds(value, slot.rule.threshold);
            let kind = match (slot.triggered, condition_met) {
                (false, true) => TransitionKind::Start,
                (true, false) => TransitionKind::Clear,
                _ => continue,
            };
            slot.triggered = condition_met;

            let transition = Transition {
                rule_id: slot.rule.id.clone(),
                kind,
                field: slot.rule.field.clone(),
                value,
            };
            info!(
                "Alert {} for rule {} on relay {}: {} = {} {} {}",
                kind.as_str().to_uppercase(),
                transition.rule_id,
                self.relay_id,
                transition.field,
                value,
                slot.rule.condition,
                slot.rule.threshold
            );

            if kind == TransitionKind::Start {
                let actions = slot.rule.actions.clone();
                for action in &actions {
                    self.execute_action(action, sample).await;
                }
            }
            self.notify(&transition, sample).await;
            transitions.push(transition);
        }
        transitions
    }

    async fn execute_action(&self, action: &Action, sample: &TelemetrySample) {
        debug!(
            "Executing action {} for relay {}",
            action.kind(),
            self.relay_id
        );

        match action {
            Action::Log { message } => {
                info!(
                    "Rule action (log): {}",
                    message.as_deref().unwrap_or(DEFAULT_LOG_MESSAGE)
                );
            },
            Action::RelayOn => {
                if !self.actuation.set_on(&self.relay_id).await {
                    debug!("relay_on for {} changed nothing", self.relay_id);
                }
            },
            Action::RelayOff => {
                if !self.actuation.set_off(&self.relay_id).await {
                    debug!("relay_off for {} changed nothing", self.relay_id);
                }
            },
            Action::PulseRelay { duration } => {
                let duration = Action::pulse_duration(*duration);
                if !self.actuation.pulse(&self.relay_id, duration).await {
                    warn!("pulse_relay for {} failed", self.relay_id);
                }
            },
            Action::PublishAlert { message } => {
                let payload = json!({
                    "relay_id": self.relay_id,
                    "alert_state": TransitionKind::Start.as_str(),
                    "message": message.as_deref().unwrap_or(DEFAULT_ALERT_MESSAGE),
                    "data": sample.to_payload(),
                });
                if let Err(e) = self.publish(payload).await {
                    warn!("Relay {}: {}", self.relay_id, e);
                }
            },
            Action::Unknown => {
                error!("Unknown action type in rules for relay {}", self.relay_id);
            },
        }
    }

    async fn notify(&self, transition: &Transition, sample: &TelemetrySample) {
        let payload = json!({
            "relay_id": self.relay_id,
            "rule_id": transition.rule_id,
            "alert_type": transition.kind.as_str(),
            "field": transition.field,
            "value": transition.value,
            "data": sample.to_payload(),
        });
        if let Err(e) = self.publish(payload).await {
            warn!(
                "Relay {}: alert {} for rule {} not delivered: {}",
                self.relay_id,
                transition.kind.as_str(),
                transition.rule_id,
                e
            );
        }
    }

    async fn publish(&self, payload: serde_json::Value) -> Result<()> {
        self.gateway
            .publish(ALERTS_TOPIC, payload)
            .await
            .map_err(|e| {
                RuleError::ActionError(format!("publish to {} failed: {}", ALERTS_TOPIC, e))
            })
    }
}

fn field_value(rule: &Rule, sample: &TelemetrySample) -> Result<f64> {
    sample
        .get(&rule.field)
        .ok_or_else(|| RuleError::MissingField {
            rule_id: rule.id.clone(),
            field: rule.field.clone(),
        })
}
