//! Trait definitions for the telemetry log and time-series sink

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use fleet_model::TelemetrySample;

use crate::point::DataPoint;

/// One entry read back from a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Log-assigned, monotonically increasing within its stream
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

/// Where a consumer-group read starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries already delivered to this consumer but not acknowledged
    Pending,
    /// Entries never delivered to the group
    New,
}

/// Append-only, per-stream telemetry log with consumer groups
///
/// Implementations:
/// - `RedisTelemetryLog`: Redis Streams backend
/// - `MemoryTelemetryLog`: in-memory backend for tests and simulation
#[async_trait]
pub trait TelemetryLog: Send + Sync + 'static {
    // ========== Producer ==========

    /// Append one entry; returns its id
    async fn append(&self, stream: &str, fields: Vec<(String, String)>) -> Result<String>;

    /// Append a sample in its flat stream encoding
    async fn append_sample(&self, stream: &str, sample: &TelemetrySample) -> Result<String> {
        self.append(stream, sample.to_stream_fields()).await
    }

    // ========== Consumer groups ==========

    /// Create `group` on `stream` (and the stream) if missing
    ///
    /// An existing group is success.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Read up to `count` entries for `consumer` in `group`
    ///
    /// `block` bounds the wait for new entries; pending reads never block.
    /// An empty vector means nothing was available in time.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledge entries; returns how many were pending
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64>;
}

/// Destination for durable time-series points
#[async_trait]
pub trait TimeSeriesSink: Send + Sync + 'static {
    /// Write all points or fail as a whole
    async fn write(&self, points: &[DataPoint]) -> Result<()>;
}
