//! General processor
//!
//! Low-rate streams (network, cellular, environmental) are stored as-is:
//! one point per entry, every configured stream read concurrently.

use std::sync::Arc;
use std::time::Duration;

use fleet_model::{
    stream_topic, Clock, CloudGateway, TelemetrySample, STREAM_CELLULAR, STREAM_ENVIRONMENTAL,
    STREAM_NETWORK,
};
use fleet_rtdb::{DataPoint, TelemetryLog, TimeSeriesSink};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CycleOutcome, GroupReader, DEFAULT_BLOCK};

/// Consumer group shared by all general streams
pub const GENERAL_GROUP: &str = "general_group";
/// Consumer name within the general group
pub const GENERAL_CONSUMER: &str = "general_processor";

/// General processor timing and streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralSettings {
    pub interval: Duration,
    pub streams: Vec<String>,
    /// Maximum entries per stream per cycle
    pub count: usize,
    pub block: Duration,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            streams: vec![
                STREAM_CELLULAR.to_string(),
                STREAM_NETWORK.to_string(),
                STREAM_ENVIRONMENTAL.to_string(),
            ],
            count: 10,
            block: DEFAULT_BLOCK,
        }
    }
}

struct Outputs {
    log: Arc<dyn TelemetryLog>,
    sink: Arc<dyn TimeSeriesSink>,
    gateway: Arc<dyn CloudGateway>,
    clock: Arc<dyn Clock>,
    count: usize,
    block: Duration,
}

/// Forwards low-rate streams to the sink entry by entry
pub struct GeneralProcessor {
    readers: Vec<GroupReader>,
    outputs: Outputs,
    interval: Duration,
}

impl GeneralProcessor {
    pub fn new(
        log: Arc<dyn TelemetryLog>,
        sink: Arc<dyn TimeSeriesSink>,
        gateway: Arc<dyn CloudGateway>,
        clock: Arc<dyn Clock>,
        settings: GeneralSettings,
    ) -> Self {
        let readers = settings
            .streams
            .iter()
            .map(|stream| GroupReader::new(stream.as_str(), GENERAL_GROUP, GENERAL_CONSUMER))
            .collect();
        Self {
            readers,
            outputs: Outputs {
                log,
                sink,
                gateway,
                clock,
                count: settings.count,
                block: settings.block,
            },
            interval: settings.interval,
        }
    }

    pub fn streams(&self) -> Vec<&str> {
        self.readers.iter().map(GroupReader::stream).collect()
    }

    pub async fn run(mut self, token: CancellationToken) {
        for reader in &mut self.readers {
            if let Err(e) = reader.ensure_group(self.outputs.log.as_ref()).await {
                error!(
                    "Error creating group {} for {}: {}",
                    GENERAL_GROUP,
                    reader.stream(),
                    e
                );
            }
        }
        info!(
            "General processor started for {:?} ({:?} interval)",
            self.streams(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {},
            }
            let outcomes = tokio::select! {
                _ = token.cancelled() => break,
                outcomes = self.process_cycle() => outcomes,
            };
            debug!("General processor cycle: {:?}", outcomes);
        }

        info!("General processor stopped");
    }

    /// Process every stream concurrently; outcomes in stream order
    pub async fn process_cycle(&mut self) -> Vec<(String, CycleOutcome)> {
        let outputs = &self.outputs;
        join_all(self.readers.iter_mut().map(|reader| async move {
            let outcome = process_stream(reader, outputs).await;
            (reader.stream().to_string(), outcome)
        }))
        .await
    }
}

async fn process_stream(reader: &mut GroupReader, outputs: &Outputs) -> CycleOutcome {
    let log = outputs.log.as_ref();
    if let Err(e) = reader.ensure_group(log).await {
        error!(
            "Error creating group {} for {}: {}",
            GENERAL_GROUP,
            reader.stream(),
            e
        );
        return CycleOutcome::Failed;
    }

    let entries = match reader.next_batch(log, outputs.count, outputs.block).await {
        Ok(entries) => entries,
        Err(e) => {
            error!("Error reading stream {}: {}", reader.stream(), e);
            return CycleOutcome::Failed;
        },
    };
    if entries.is_empty() {
        return CycleOutcome::Idle;
    }

    let stream = reader.stream().to_string();
    let now = outputs.clock.now_utc();
    let mut samples = Vec::with_capacity(entries.len());
    for entry in &entries {
        match TelemetrySample::from_stream_fields(stream.as_str(), &entry.fields, now) {
            Ok(sample) => samples.push(sample),
            Err(e) => error!(
                "Error processing message {} in {}: {}",
                entry.id, stream, e
            ),
        }
    }

    if samples.is_empty() {
        warn!(
            "No usable entries in batch of {} on {}, discarding",
            entries.len(),
            stream
        );
        if let Err(e) = reader.ack(log, &entries).await {
            error!("Failed to acknowledge batch on {}: {}", stream, e);
            reader.mark_failed();
        }
        return CycleOutcome::Discarded {
            entries: entries.len(),
        };
    }

    let points: Vec<DataPoint> = samples
        .iter()
        .map(|sample| {
            sample.fields.iter().fold(
                DataPoint::new(stream.as_str(), sample.timestamp).tag("source", stream.as_str()),
                |point, (name, value)| point.field(name.as_str(), *value),
            )
        })
        .collect();

    if let Err(e) = outputs.sink.write(&points).await {
        error!(
            "Failed to write {} points of {}, keeping them pending: {}",
            points.len(),
            stream,
            e
        );
        reader.mark_failed();
        return CycleOutcome::Failed;
    }

    let topic = stream_topic(&stream);
    for sample in &samples {
        if let Err(e) = outputs.gateway.publish(&topic, sample.to_payload()).await {
            warn!("Failed to publish to {}: {}", topic, e);
        }
    }

    if let Err(e) = reader.ack(log, &entries).await {
        error!("Failed to acknowledge batch on {}: {}", stream, e);
        reader.mark_failed();
    }

    debug!("Forwarded {} entries from {}", points.len(), stream);
    CycleOutcome::Flushed {
        entries: entries.len(),
        points: points.len(),
    }
}
