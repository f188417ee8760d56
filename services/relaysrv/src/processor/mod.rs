//! Stream processors
//!
//! Processors drain the telemetry log through consumer groups and flush
//! points to the time-series sink. Entries are acknowledged only after the
//! sink accepted the batch:
//!
//! ```text
//!   idle ──sleep──▶ batch-collect ──entries──▶ flush ──ok──▶ ack ──▶ idle
//!                        │                       │
//!                        └──none──▶ idle         └──err──▶ keep pending ──▶ idle
//! ```
//!
//! A failed flush (or a restart) puts the reader back into recovery, which
//! re-reads this consumer's pending entries before any new ones.

pub mod general;
pub mod relay;

use std::time::Duration;

use anyhow::Result;
use fleet_rtdb::{ReadCursor, StreamEntry, TelemetryLog};
use tracing::{debug, info};

pub use general::{GeneralProcessor, GeneralSettings};
pub use relay::{RelayProcessor, RelaySettings};

/// Default bound for a blocking group read
pub const DEFAULT_BLOCK: Duration = Duration::from_millis(1000);

/// Result of one processing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to read
    Idle,
    /// Points written and entries acknowledged
    Flushed { entries: usize, points: usize },
    /// No entry was usable; acknowledged without a write
    Discarded { entries: usize },
    /// Read or write failed; entries stay pending
    Failed,
}

/// Consumer-group cursor of one processor on one stream
#[derive(Debug, Clone)]
pub struct GroupReader {
    stream: String,
    group: String,
    consumer: String,
    recovering: bool,
    group_ready: bool,
}

impl GroupReader {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            recovering: true,
            group_ready: false,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    /// Create the consumer group once; retried on later cycles after a failure
    pub async fn ensure_group(&mut self, log: &dyn TelemetryLog) -> Result<()> {
        if self.group_ready {
            return Ok(());
        }
        log.ensure_group(&self.stream, &self.group).await?;
        debug!("Group {} ready on stream {}", self.group, self.stream);
        self.group_ready = true;
        Ok(())
    }

    /// Next batch of up to `count` entries
    ///
    /// While recovering, this consumer's pending entries come first; once
    /// none are left the reader switches to new entries, waiting up to
    /// `block` for them.
    pub async fn next_batch(
        &mut self,
        log: &dyn TelemetryLog,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        if self.recovering {
            let pending = log
                .read_group(
                    &self.stream,
                    &self.group,
                    &self.consumer,
                    ReadCursor::Pending,
                    count,
                    None,
                )
                .await?;
            if !pending.is_empty() {
                info!(
                    "Redelivering {} pending entries on stream {} to {}",
                    pending.len(),
                    self.stream,
                    self.consumer
                );
                return Ok(pending);
            }
            self.recovering = false;
        }

        log.read_group(
            &self.stream,
            &self.group,
            &self.consumer,
            ReadCursor::New,
            count,
            Some(block),
        )
        .await
    }

    /// Leave entries pending and re-read them next cycle
    pub fn mark_failed(&mut self) {
        self.recovering = true;
    }

    pub async fn ack(&self, log: &dyn TelemetryLog, entries: &[StreamEntry]) -> Result<u64> {
        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        log.ack(&self.stream, &self.group, &ids).await
    }
}
