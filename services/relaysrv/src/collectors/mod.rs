//! Low-rate collectors
//!
//! Each collector appends one entry per interval to its own stream
//! (`network`, `environmental`). Collectors only append; the general
//! processor drains the streams.

pub mod environment;
pub mod network;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_model::{Clock, TelemetrySample};
use fleet_rtdb::TelemetryLog;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use environment::EnvironmentCollector;
pub use network::NetworkProbe;

/// A periodic measurement source
#[async_trait]
pub trait Collector: Send + 'static {
    /// Stream the measurements are appended to
    fn stream(&self) -> &str;

    /// Take one measurement
    async fn collect(&mut self) -> anyhow::Result<BTreeMap<String, f64>>;
}

/// Collect and append once per `period` until `token` is cancelled
///
/// Failed collections and appends are logged; the loop keeps going.
pub async fn run_collector(
    mut collector: Box<dyn Collector>,
    log: Arc<dyn TelemetryLog>,
    clock: Arc<dyn Clock>,
    period: Duration,
    token: CancellationToken,
) {
    let stream = collector.stream().to_string();
    info!("Collector for stream {} started ({:?} interval)", stream, period);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let fields = tokio::select! {
            _ = token.cancelled() => break,
            result = collector.collect() => match result {
                Ok(fields) => fields,
                Err(e) => {
                    warn!("Collection for stream {} failed: {:#}", stream, e);
                    continue;
                },
            },
        };

        let sample = TelemetrySample {
            source: stream.clone(),
            timestamp: clock.now_utc(),
            fields,
        };
        match log.append_sample(&stream, &sample).await {
            Ok(id) => debug!("Appended {} to stream {}", id, stream),
            Err(e) => error!("Failed to append to stream {}: {}", stream, e),
        }
    }

    info!("Collector for stream {} stopped", stream);
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fleet_model::{FixedClock, TIMESTAMP_FIELD};
    use fleet_rtdb::MemoryTelemetryLog;
    use tracing_test::traced_test;

    struct Counter {
        calls: u32,
    }

    #[async_trait]
    impl Collector for Counter {
        fn stream(&self) -> &str {
            "network"
        }

        async fn collect(&mut self) -> anyhow::Result<BTreeMap<String, f64>> {
            self.calls += 1;
            if self.calls == 2 {
                anyhow::bail!("probe target unreachable");
            }
            Ok(BTreeMap::from([("calls".to_string(), f64::from(self.calls))]))
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_run_collector_appends_and_survives_failures() {
        let log = Arc::new(MemoryTelemetryLog::new());
        let clock = Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2025, 1, 6)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        ));
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_collector(
            Box::new(Counter { calls: 0 }),
            log.clone(),
            clock,
            Duration::from_secs(10),
            token.clone(),
        ));

        // Ticks at 0s, 10s, 20s; the second collection fails
        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();

        let entries = log.entries("network");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fields["calls"], "1");
        assert_eq!(entries[1].fields["calls"], "3");
        assert_eq!(
            entries[0].fields[TIMESTAMP_FIELD],
            "2025-01-06T12:00:00.000000Z"
        );
        assert!(logs_contain("probe target unreachable"));
    }
}
