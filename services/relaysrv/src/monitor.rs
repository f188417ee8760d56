//! Relay monitor
//!
//! One monitor per relay that has a power sensor or an enabled schedule.
//! It runs two loops side by side:
//!
//! - schedule loop: reconciles the relay with its daily window
//! - sensor loop: samples volts/watts/amps, appends them to the relay's
//!   telemetry stream and feeds the rules engine
//!
//! Both loops stop at their next sleep or read once the token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use fleet_model::{Clock, CloudGateway, Relay, Schedule};
use fleet_rtdb::TelemetryLog;
use fleet_rules::{desired_state, RulesEngine};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hardware::SensorPort;
use crate::manager::RelayManager;

/// Loop timing of a relay monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Schedule check period
    pub schedule_interval: Duration,
    /// Sensor sampling period
    pub sensor_interval: Duration,
    /// Bound for sensor initialization and each read
    pub sensor_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(60),
            sensor_interval: Duration::from_secs(1),
            sensor_timeout: Duration::from_millis(500),
        }
    }
}

/// Schedule and sensor loops of one relay
pub struct RelayMonitor {
    relay: Relay,
    manager: Arc<RelayManager>,
    engine: RulesEngine,
    sensor: Option<Box<dyn SensorPort>>,
    log: Arc<dyn TelemetryLog>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
}

impl RelayMonitor {
    pub fn new(
        relay: Relay,
        manager: Arc<RelayManager>,
        sensor: Option<Box<dyn SensorPort>>,
        log: Arc<dyn TelemetryLog>,
        gateway: Arc<dyn CloudGateway>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        let engine = RulesEngine::new(
            relay.id.clone(),
            relay.rules.clone(),
            manager.clone(),
            gateway,
        );
        Self {
            relay,
            manager,
            engine,
            sensor,
            log,
            clock,
            settings,
        }
    }

    pub fn relay_id(&self) -> &str {
        &self.relay.id
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    /// Run until `token` is cancelled
    ///
    /// A sensor that fails to initialize disables sampling for this relay
    /// only; the schedule loop keeps running.
    pub async fn run(self, token: CancellationToken) {
        let RelayMonitor {
            relay,
            manager,
            mut engine,
            sensor,
            log,
            clock,
            settings,
        } = self;
        let relay_id = relay.id.as_str();

        let sensor = if relay.monitor {
            initialize_sensor(relay_id, sensor, settings.sensor_timeout).await
        } else {
            debug!("Monitoring disabled for relay {}", relay_id);
            None
        };

        let schedule = relay.schedule.as_ref().filter(|s| s.enabled);
        if schedule.is_none() {
            debug!("Schedule disabled for relay {}", relay_id);
        }
        if schedule.is_none() && sensor.is_none() {
            warn!("No loops running for relay {}", relay_id);
            return;
        }

        info!(
            "Relay monitor started for {} (schedule: {}, sensor: {})",
            relay_id,
            schedule.is_some(),
            sensor.is_some()
        );

        let clock = clock.as_ref();
        let token = &token;
        let manager = manager.as_ref();
        let engine = &mut engine;
        let log = log.as_ref();
        let settings = &settings;

        let schedule_loop = async move {
            if let Some(schedule) = schedule {
                run_schedule_loop(
                    relay_id,
                    schedule,
                    manager,
                    clock,
                    settings.schedule_interval,
                    token,
                )
                .await;
            }
        };
        let sensor_loop = async move {
            if let Some(sensor) = sensor {
                run_sensor_loop(relay_id, sensor, engine, log, clock, settings, token).await;
            }
        };
        tokio::join!(schedule_loop, sensor_loop);

        info!("Relay monitor stopped for {}", relay_id);
    }
}

async fn initialize_sensor(
    relay_id: &str,
    sensor: Option<Box<dyn SensorPort>>,
    timeout: Duration,
) -> Option<Box<dyn SensorPort>> {
    let Some(mut sensor) = sensor else {
        error!(
            "Relay {} has monitoring enabled but no sensor attached, monitoring disabled",
            relay_id
        );
        return None;
    };

    match tokio::time::timeout(timeout, sensor.initialize()).await {
        Ok(Ok(())) => {
            debug!("Sensor initialized for relay {}", relay_id);
            Some(sensor)
        },
        Ok(Err(e)) => {
            error!(
                "Error initializing sensor for relay {}: {}, monitoring disabled",
                relay_id, e
            );
            None
        },
        Err(_) => {
            error!(
                "Sensor initialization for relay {} timed out, monitoring disabled",
                relay_id
            );
            None
        },
    }
}

async fn run_schedule_loop(
    relay_id: &str,
    schedule: &Schedule,
    manager: &RelayManager,
    clock: &dyn Clock,
    period: Duration,
    token: &CancellationToken,
) {
    let mut last_commanded = manager.read_state(relay_id).await;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let desired = desired_state(Some(schedule), clock.now_local());
        if desired == last_commanded {
            continue;
        }

        info!(
            "Schedule sets relay {} {}",
            relay_id,
            if desired { "ON" } else { "OFF" }
        );
        if desired {
            manager.set_on(relay_id).await;
        } else {
            manager.set_off(relay_id).await;
        }

        // A failed write leaves the old state, so the next tick retries
        last_commanded = manager.read_state(relay_id).await;
        if last_commanded != desired {
            warn!(
                "Relay {} did not reach scheduled state, retrying next cycle",
                relay_id
            );
        }
    }
    debug!("Schedule loop stopped for relay {}", relay_id);
}

async fn run_sensor_loop(
    relay_id: &str,
    mut sensor: Box<dyn SensorPort>,
    engine: &mut RulesEngine,
    log: &dyn TelemetryLog,
    clock: &dyn Clock,
    settings: &MonitorSettings,
    token: &CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.sensor_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = tokio::time::timeout(settings.sensor_timeout, sensor.read()) => result,
        };
        let reading = match result {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => {
                warn!("Error collecting data for relay {}: {}", relay_id, e);
                continue;
            },
            Err(_) => {
                warn!(
                    "Sensor read for relay {} timed out after {:?}",
                    relay_id, settings.sensor_timeout
                );
                continue;
            },
        };

        let sample = reading.into_sample(relay_id, clock.now_utc());
        match log.append_sample(relay_id, &sample).await {
            Ok(id) => debug!("Data streamed for relay {} as {}", relay_id, id),
            Err(e) => error!("Error streaming data for relay {}: {}", relay_id, e),
        }

        engine.evaluate(&sample).await;
    }
    debug!("Sensor loop stopped for relay {}", relay_id);
}
