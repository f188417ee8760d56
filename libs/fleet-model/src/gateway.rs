//! Cloud gateway contract
//!
//! The cloud transport itself lives outside this workspace; the controller
//! only needs best-effort publish and command status reporting.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rule alerts and `publish_alert` actions
pub const ALERTS_TOPIC: &str = "alerts/data";
/// Aggregated relay points
pub const RELAY_TOPIC: &str = "relay/data";

/// Topic for a low-rate stream, e.g. `network/data`
pub fn stream_topic(stream: &str) -> String {
    format!("{}/data", stream)
}

/// Outcome of an inbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Succeeded,
    Failed,
}

/// Status update for one inbound command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatusReport {
    pub job_id: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CommandStatusReport {
    pub fn new(job_id: impl Into<String>, status: CommandStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            details: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// `jobs/{job_id}/status`
    pub fn topic(&self) -> String {
        format!("jobs/{}/status", self.job_id)
    }
}

/// Outbound collaborator towards the cloud
#[async_trait]
pub trait CloudGateway: Send + Sync + 'static {
    /// Best-effort publish of a JSON payload
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;

    /// Report the outcome of an inbound command
    async fn report_status(&self, report: CommandStatusReport) -> Result<()>;
}

/// In-memory gateway that records everything it is given
#[derive(Debug, Default)]
pub struct MemoryGateway {
    published: Mutex<Vec<(String, Value)>>,
    reports: Mutex<Vec<CommandStatusReport>>,
    fail: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    /// Payloads published on one topic, in order
    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn reports(&self) -> Vec<CommandStatusReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl CloudGateway for MemoryGateway {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("gateway unavailable");
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn report_status(&self, report: CommandStatusReport) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("gateway unavailable");
        }
        self.reports.lock().push(report);
        Ok(())
    }
}
