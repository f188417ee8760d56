//! Stream processor integration tests: aggregation and at-least-once delivery

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use fleet_model::{stream_topic, Clock, TelemetrySample, RELAY_TOPIC, STREAM_NETWORK};
use fleet_rtdb::{ReadCursor, TelemetryLog};
use relaysrv::processor::{
    CycleOutcome, GeneralProcessor, GeneralSettings, RelayProcessor, RelaySettings,
};
use tokio_util::sync::CancellationToken;

mod support;
use support::{reading, wait_until, Harness};

fn relay_processor(h: &Harness) -> RelayProcessor {
    RelayProcessor::new(
        "router",
        h.log.clone(),
        h.sink.clone(),
        h.gateway.clone(),
        h.clock.clone(),
        RelaySettings::default(),
    )
}

#[tokio::test]
async fn test_full_window_averages_to_one_point() {
    let h = Harness::new();
    h.append_readings("router", reading(12.0, 6.0, 0.5), 60).await;

    let mut processor = relay_processor(&h);
    let outcome = processor.process_cycle().await;

    assert_eq!(
        outcome,
        CycleOutcome::Flushed {
            entries: 60,
            points: 1
        }
    );
    let points = h.sink.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].measurement, "router");
    assert_eq!(points[0].tags["source"], "router");
    assert_eq!(points[0].fields["volts"], 12.0);
    assert_eq!(points[0].fields["watts"], 6.0);
    assert_eq!(points[0].fields["amps"], 0.5);

    let published = h.gateway.published_on(RELAY_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["source"], "router");
    assert_eq!(published[0]["volts"], 12.0);

    assert_eq!(h.log.pending_count("router", processor.group()), 0);
}

#[tokio::test]
async fn test_batch_size_bounds_each_cycle() {
    let h = Harness::new();
    h.append_readings("router", reading(12.0, 6.0, 0.5), 75).await;

    let mut processor = relay_processor(&h);
    assert_eq!(
        processor.process_cycle().await,
        CycleOutcome::Flushed {
            entries: 60,
            points: 1
        }
    );
    assert_eq!(
        processor.process_cycle().await,
        CycleOutcome::Flushed {
            entries: 15,
            points: 1
        }
    );
    assert_eq!(h.sink.points().len(), 2);
}

#[tokio::test]
async fn test_sink_failure_keeps_entries_pending_until_retry() {
    let h = Harness::new();
    h.append_readings("router", reading(12.0, 6.0, 0.5), 10).await;
    h.sink.set_failing(true);

    let mut processor = relay_processor(&h);
    assert_eq!(processor.process_cycle().await, CycleOutcome::Failed);
    assert_eq!(h.log.pending_count("router", "relay_group_router"), 10);
    assert!(h.gateway.published_on(RELAY_TOPIC).is_empty());

    // New entries arrive meanwhile; the pending batch is retried first
    h.append_readings("router", reading(24.0, 12.0, 1.0), 5).await;
    h.sink.set_failing(false);

    assert_eq!(
        processor.process_cycle().await,
        CycleOutcome::Flushed {
            entries: 10,
            points: 1
        }
    );
    assert_eq!(h.sink.points()[0].fields["volts"], 12.0);
    assert_eq!(h.log.pending_count("router", "relay_group_router"), 0);

    assert_eq!(
        processor.process_cycle().await,
        CycleOutcome::Flushed {
            entries: 5,
            points: 1
        }
    );
    assert_eq!(h.sink.points()[1].fields["volts"], 24.0);
    assert_eq!(h.sink.attempts(), 3);
}

#[tokio::test]
async fn test_restarted_processor_redelivers_unacknowledged_entries() {
    let h = Harness::new();
    h.append_readings("router", reading(12.0, 6.0, 0.5), 20).await;

    // A previous instance read the batch and died before acknowledging it
    h.log.ensure_group("router", "relay_group_router").await.unwrap();
    let delivered = h
        .log
        .read_group(
            "router",
            "relay_group_router",
            "processor_router",
            ReadCursor::New,
            60,
            None,
        )
        .await
        .unwrap();
    assert_eq!(delivered.len(), 20);
    assert_eq!(h.log.pending_count("router", "relay_group_router"), 20);

    let mut processor = relay_processor(&h);
    assert_eq!(processor.consumer(), "processor_router");
    assert_eq!(
        processor.process_cycle().await,
        CycleOutcome::Flushed {
            entries: 20,
            points: 1
        }
    );
    assert_eq!(h.log.pending_count("router", "relay_group_router"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_flushes_once_per_window() {
    let h = Harness::new();
    h.append_readings("router", reading(12.0, 6.0, 0.5), 30).await;

    let token = CancellationToken::new();
    let handle = tokio::spawn(relay_processor(&h).run(token.clone()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.sink.attempts(), 0);

    assert!(wait_until(Duration::from_secs(60), || h.sink.points().len() == 1).await);

    h.append_readings("router", reading(12.0, 6.0, 0.5), 30).await;
    assert!(wait_until(Duration::from_secs(70), || h.sink.points().len() == 2).await);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_general_processor_forwards_each_entry() {
    let h = Harness::new();
    for rtt in [21.5, 23.0] {
        let sample = TelemetrySample::new(STREAM_NETWORK, h.clock.now_utc())
            .with_field("avg_rtt", rtt)
            .with_field("packet_loss_percent", 0.0);
        h.log.append_sample(STREAM_NETWORK, &sample).await.unwrap();
    }

    let mut processor = GeneralProcessor::new(
        h.log.clone(),
        h.sink.clone(),
        h.gateway.clone(),
        h.clock.clone(),
        GeneralSettings {
            block: Duration::from_millis(20),
            ..GeneralSettings::default()
        },
    );
    let outcomes = processor.process_cycle().await;

    assert_eq!(outcomes.len(), 3);
    for (stream, outcome) in &outcomes {
        if stream == STREAM_NETWORK {
            assert_eq!(
                *outcome,
                CycleOutcome::Flushed {
                    entries: 2,
                    points: 2
                }
            );
        } else {
            assert_eq!(*outcome, CycleOutcome::Idle);
        }
    }

    let points = h.sink.points();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p.measurement == STREAM_NETWORK));
    assert_eq!(points[1].fields["avg_rtt"], 23.0);

    let published = h.gateway.published_on(&stream_topic(STREAM_NETWORK));
    assert_eq!(published.len(), 2);
    assert_eq!(h.log.pending_count(STREAM_NETWORK, "general_group"), 0);
}
