//! Relay processor
//!
//! Relay streams are sampled every second; one processor per relay averages
//! a window of samples into a single point for the sink and the cloud.

use std::sync::Arc;
use std::time::Duration;

use fleet_model::{round2, Clock, CloudGateway, PowerReading, RELAY_TOPIC};
use fleet_rtdb::{DataPoint, TelemetryLog, TimeSeriesSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CycleOutcome, GroupReader, DEFAULT_BLOCK};

/// Relay processor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Averaging window (sleep between cycles)
    pub window: Duration,
    /// Maximum entries per cycle
    pub batch_size: usize,
    /// Bound for the blocking read
    pub block: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            batch_size: 60,
            block: DEFAULT_BLOCK,
        }
    }
}

/// Averages one relay stream into the sink
pub struct RelayProcessor {
    relay_id: String,
    reader: GroupReader,
    log: Arc<dyn TelemetryLog>,
    sink: Arc<dyn TimeSeriesSink>,
    gateway: Arc<dyn CloudGateway>,
    clock: Arc<dyn Clock>,
    settings: RelaySettings,
}

impl RelayProcessor {
    pub fn new(
        relay_id: impl Into<String>,
        log: Arc<dyn TelemetryLog>,
        sink: Arc<dyn TimeSeriesSink>,
        gateway: Arc<dyn CloudGateway>,
        clock: Arc<dyn Clock>,
        settings: RelaySettings,
    ) -> Self {
        let relay_id = relay_id.into();
        let reader = GroupReader::new(
            relay_id.clone(),
            format!("relay_group_{}", relay_id),
            format!("processor_{}", relay_id),
        );
        Self {
            relay_id,
            reader,
            log,
            sink,
            gateway,
            clock,
            settings,
        }
    }

    pub fn relay_id(&self) -> &str {
        &self.relay_id
    }

    pub fn group(&self) -> &str {
        self.reader.group()
    }

    pub fn consumer(&self) -> &str {
        self.reader.consumer()
    }

    /// Sleep a window, process a batch, repeat until cancelled
    pub async fn run(mut self, token: CancellationToken) {
        if let Err(e) = self.reader.ensure_group(self.log.as_ref()).await {
            error!(
                "Error creating group {} for {}: {}",
                self.reader.group(),
                self.relay_id,
                e
            );
        }
        info!(
            "Relay processor started for {} (window {:?}, batch {})",
            self.relay_id, self.settings.window, self.settings.batch_size
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.window) => {},
            }
            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.process_cycle() => outcome,
            };
            debug!("Relay processor {} cycle: {:?}", self.relay_id, outcome);
        }

        info!("Relay processor stopped for {}", self.relay_id);
    }

    /// Read one batch, average it, flush it, acknowledge it
    pub async fn process_cycle(&mut self) -> CycleOutcome {
        let log = self.log.as_ref();
        if let Err(e) = self.reader.ensure_group(log).await {
            error!(
                "Error creating group {} for {}: {}",
                self.reader.group(),
                self.relay_id,
                e
            );
            return CycleOutcome::Failed;
        }

        let entries = match self
            .reader
            .next_batch(log, self.settings.batch_size, self.settings.block)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!("Error reading stream {}: {}", self.relay_id, e);
                return CycleOutcome::Failed;
            },
        };
        if entries.is_empty() {
            return CycleOutcome::Idle;
        }

        let (mut volts, mut watts, mut amps) = (0.0, 0.0, 0.0);
        let mut count = 0usize;
        for entry in &entries {
            match PowerReading::from_stream_fields(&entry.fields) {
                Ok(reading) => {
                    volts += reading.volts;
                    watts += reading.watts;
                    amps += reading.amps;
                    count += 1;
                },
                Err(e) => error!(
                    "Error processing message {} on {}: {}",
                    entry.id, self.relay_id, e
                ),
            }
        }

        if count == 0 {
            warn!(
                "No usable entries in batch of {} on {}, discarding",
                entries.len(),
                self.relay_id
            );
            if let Err(e) = self.reader.ack(log, &entries).await {
                error!("Failed to acknowledge batch on {}: {}", self.relay_id, e);
                self.reader.mark_failed();
            }
            return CycleOutcome::Discarded {
                entries: entries.len(),
            };
        }

        let n = count as f64;
        let average = PowerReading {
            volts: round2(volts / n),
            watts: round2(watts / n),
            amps: round2(amps / n),
        };
        let now = self.clock.now_utc();
        let point = DataPoint::new(self.relay_id.as_str(), now)
            .tag("source", self.relay_id.as_str())
            .field("volts", average.volts)
            .field("watts", average.watts)
            .field("amps", average.amps);

        if let Err(e) = self.sink.write(&[point]).await {
            error!(
                "Failed to write {} averaged entries of {}, keeping them pending: {}",
                count, self.relay_id, e
            );
            self.reader.mark_failed();
            return CycleOutcome::Failed;
        }

        let payload = average.into_sample(self.relay_id.as_str(), now).to_payload();
        if let Err(e) = self.gateway.publish(RELAY_TOPIC, payload).await {
            warn!("Failed to publish {} averages: {}", self.relay_id, e);
        }

        if let Err(e) = self.reader.ack(log, &entries).await {
            error!("Failed to acknowledge batch on {}: {}", self.relay_id, e);
            self.reader.mark_failed();
        }

        debug!(
            "Averaged {} of {} entries on {}: {:?}",
            count,
            entries.len(),
            self.relay_id,
            average
        );
        CycleOutcome::Flushed {
            entries: entries.len(),
            points: 1,
        }
    }
}
