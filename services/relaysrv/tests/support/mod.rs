//! Shared fixtures for relaysrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use fleet_model::{Clock, FixedClock, MemoryGateway, PowerReading, Relay, Rule, Schedule};
use fleet_rtdb::{MemorySink, MemoryTelemetryLog, TelemetryLog};
use relaysrv::commands::MemoryJobQueue;
use relaysrv::hardware::MemoryActuator;
use relaysrv::manager::DEFAULT_WRITE_TIMEOUT;
use relaysrv::{Backends, RelayManager};

/// Monday 2025-01-06 at `hour:minute`
pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 6)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn relay(id: &str, pin: u8) -> Relay {
    Relay {
        id: id.to_string(),
        name: id.to_string(),
        pin,
        sensor_address: "0x40".to_string(),
        boot_power: false,
        monitor: false,
        schedule: None,
        rules: Vec::new(),
    }
}

pub fn daily(on_time: &str, off_time: &str) -> Schedule {
    Schedule {
        enabled: true,
        every_day: true,
        days: HashSet::new(),
        on_time: on_time.to_string(),
        off_time: off_time.to_string(),
    }
}

pub fn rule_from_yaml(yaml: &str) -> Rule {
    serde_yaml::from_str(yaml).unwrap()
}

pub fn reading(volts: f64, watts: f64, amps: f64) -> PowerReading {
    PowerReading { volts, watts, amps }
}

/// In-memory collaborators with a clock fixed at Monday 07:00
pub struct Harness {
    pub log: Arc<MemoryTelemetryLog>,
    pub sink: Arc<MemorySink>,
    pub gateway: Arc<MemoryGateway>,
    pub actuator: Arc<MemoryActuator>,
    pub jobs: Arc<MemoryJobQueue>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            log: Arc::new(MemoryTelemetryLog::new()),
            sink: Arc::new(MemorySink::new()),
            gateway: Arc::new(MemoryGateway::new()),
            actuator: Arc::new(MemoryActuator::new()),
            jobs: Arc::new(MemoryJobQueue::new()),
            clock: Arc::new(FixedClock::new(at(7, 0))),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            log: self.log.clone(),
            sink: self.sink.clone(),
            gateway: self.gateway.clone(),
            actuator: self.actuator.clone(),
            jobs: self.jobs.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Manager over `relays`, already driven to boot state
    pub async fn manager(&self, relays: &[Relay]) -> Arc<RelayManager> {
        let manager = Arc::new(
            RelayManager::new(relays, self.actuator.clone(), DEFAULT_WRITE_TIMEOUT).unwrap(),
        );
        manager.init().await.unwrap();
        manager
    }

    /// Append `n` identical power samples to the relay stream
    pub async fn append_readings(&self, relay_id: &str, reading: PowerReading, n: usize) {
        for _ in 0..n {
            let sample = reading.into_sample(relay_id, self.clock.now_utc());
            self.log.append_sample(relay_id, &sample).await.unwrap();
        }
    }
}

/// Poll `check` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
