//! In-memory telemetry log and time-series sink
//!
//! Mirrors the Redis Streams consumer-group model closely enough to test
//! delivery, acknowledgement and redelivery without a server.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::point::DataPoint;
use crate::traits::{ReadCursor, StreamEntry, TelemetryLog, TimeSeriesSink};

#[derive(Default)]
struct GroupState {
    /// Index of the next never-delivered entry
    next_index: usize,
    /// Delivered-but-unacknowledged entry indexes, per consumer
    pending: HashMap<String, BTreeSet<usize>>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    index_of: HashMap<String, usize>,
    groups: HashMap<String, GroupState>,
}

/// In-memory telemetry log with consumer-group semantics
pub struct MemoryTelemetryLog {
    streams: DashMap<String, StreamState>,
    appended: Notify,
    sequence: AtomicUsize,
    fail_appends: AtomicBool,
}

impl MemoryTelemetryLog {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            appended: Notify::new(),
            sequence: AtomicUsize::new(0),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make subsequent appends fail (or succeed again)
    pub fn set_append_failing(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// All entries ever appended to `stream`
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.streams
            .get(stream)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams.get(stream).map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Unacknowledged entries across all consumers of `group`
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .get(stream)
            .and_then(|s| {
                s.groups
                    .get(group)
                    .map(|g| g.pending.values().map(BTreeSet::len).sum())
            })
            .unwrap_or(0)
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.streams
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    fn read_now(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut state = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| anyhow!("NOGROUP no such stream: {}", stream))?;
        let state = &mut *state;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| anyhow!("NOGROUP no such group {} on {}", group, stream))?;

        match cursor {
            ReadCursor::Pending => Ok(group_state
                .pending
                .get(consumer)
                .map(|ids| {
                    ids.iter()
                        .take(count)
                        .map(|&i| state.entries[i].clone())
                        .collect()
                })
                .unwrap_or_default()),
            ReadCursor::New => {
                let start = group_state.next_index;
                let end = state.entries.len().min(start.saturating_add(count));
                let delivered = group_state.pending.entry(consumer.to_string()).or_default();
                delivered.extend(start..end);
                group_state.next_index = end;
                Ok(state.entries[start..end].to_vec())
            },
        }
    }
}

impl Default for MemoryTelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryLog for MemoryTelemetryLog {
    async fn append(&self, stream: &str, fields: Vec<(String, String)>) -> Result<String> {
        if self.fail_appends.load(Ordering::SeqCst) {
            bail!("telemetry log unavailable");
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}", chrono::Utc::now().timestamp_millis(), seq);
        {
            let mut state = self.streams.entry(stream.to_string()).or_default();
            let index = state.entries.len();
            state.index_of.insert(id.clone(), index);
            state.entries.push(StreamEntry {
                id: id.clone(),
                fields: fields.into_iter().collect(),
            });
        }
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut state = self.streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = block.map(|b| Instant::now() + b);
        loop {
            // Register interest before checking so an append in between is not missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.read_now(stream, group, consumer, cursor, count)?;
            if !entries.is_empty() || cursor == ReadCursor::Pending {
                return Ok(entries);
            }
            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64> {
        let Some(mut state) = self.streams.get_mut(stream) else {
            return Ok(0);
        };
        let state = &mut *state;
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(0);
        };

        let mut acked = 0;
        for id in ids {
            let Some(&index) = state.index_of.get(id) else {
                continue;
            };
            for delivered in group_state.pending.values_mut() {
                if delivered.remove(&index) {
                    acked += 1;
                }
            }
        }
        Ok(acked)
    }
}

/// In-memory sink recording written points, with failure injection
#[derive(Default)]
pub struct MemorySink {
    points: Mutex<Vec<DataPoint>>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn points(&self) -> Vec<DataPoint> {
        self.points.lock().clone()
    }

    /// Write calls seen, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSeriesSink for MemorySink {
    async fn write(&self, points: &[DataPoint]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("sink unavailable");
        }
        self.points.lock().extend_from_slice(points);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn fields(v: &str) -> Vec<(String, String)> {
        vec![("volts".to_string(), v.to_string())]
    }

    #[tokio::test]
    async fn test_new_entries_are_delivered_once_per_group() {
        let log = MemoryTelemetryLog::new();
        log.ensure_group("router", "g").await.unwrap();
        log.append("router", fields("1")).await.unwrap();
        log.append("router", fields("2")).await.unwrap();

        let first = log
            .read_group("router", "g", "c", ReadCursor::New, 10, None)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = log
            .read_group("router", "g", "c", ReadCursor::New, 10, None)
            .await
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(log.pending_count("router", "g"), 2);
    }

    #[tokio::test]
    async fn test_pending_survive_until_acked() {
        let log = MemoryTelemetryLog::new();
        log.ensure_group("router", "g").await.unwrap();
        let id = log.append("router", fields("1")).await.unwrap();
        log.read_group("router", "g", "c", ReadCursor::New, 10, None)
            .await
            .unwrap();

        let pending = log
            .read_group("router", "g", "c", ReadCursor::Pending, 10, None)
            .await
            .unwrap();
        assert_eq!(pending[0].id, id);

        // Another consumer does not see c's pending entries
        let other = log
            .read_group("router", "g", "other", ReadCursor::Pending, 10, None)
            .await
            .unwrap();
        assert!(other.is_empty());

        assert_eq!(log.ack("router", "g", &[id.clone()]).await.unwrap(), 1);
        assert_eq!(log.ack("router", "g", &[id]).await.unwrap(), 0);
        assert_eq!(log.pending_count("router", "g"), 0);
    }

    #[tokio::test]
    async fn test_group_created_before_stream_sees_earlier_entries() {
        let log = MemoryTelemetryLog::new();
        log.append("network", fields("1")).await.unwrap();
        log.ensure_group("network", "general_group").await.unwrap();
        // Idempotent
        log.ensure_group("network", "general_group").await.unwrap();

        let read = log
            .read_group("network", "general_group", "c", ReadCursor::New, 10, None)
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_group_is_an_error() {
        let log = MemoryTelemetryLog::new();
        log.append("router", fields("1")).await.unwrap();
        let result = log
            .read_group("router", "nope", "c", ReadCursor::New, 10, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out_empty() {
        let log = MemoryTelemetryLog::new();
        log.ensure_group("router", "g").await.unwrap();

        let started = Instant::now();
        let read = log
            .read_group(
                "router",
                "g",
                "c",
                ReadCursor::New,
                10,
                Some(Duration::from_millis(1000)),
            )
            .await
            .unwrap();
        assert!(read.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_wakes_on_append() {
        let log = std::sync::Arc::new(MemoryTelemetryLog::new());
        log.ensure_group("router", "g").await.unwrap();

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.append("router", fields("7")).await.unwrap();
        });

        let read = log
            .read_group(
                "router",
                "g",
                "c",
                ReadCursor::New,
                10,
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].fields["volts"], "7");
    }

    #[tokio::test]
    async fn test_memory_sink_failure_injection() {
        let sink = MemorySink::new();
        let point = DataPoint::new("router", chrono::Utc::now()).field("volts", 12.0);

        sink.set_failing(true);
        assert!(sink.write(&[point.clone()]).await.is_err());
        sink.set_failing(false);
        sink.write(&[point]).await.unwrap();

        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.points().len(), 1);
    }
}
