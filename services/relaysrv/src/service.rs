//! Service bootstrap
//!
//! Wires the configured relays to their monitors and processors, starts
//! the collectors and the command listener, and tears everything down on
//! shutdown. Relays keep their last commanded state when the service stops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::{wait_for_shutdown, CancellationToken, RedisClient};
use fleet_model::{Clock, CloudGateway, PowerReading, Relay, SystemClock};
use fleet_rtdb::{InfluxSink, RedisTelemetryLog, TelemetryLog, TimeSeriesSink};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collectors::{run_collector, Collector, NetworkProbe};
use crate::commands::{CommandExecutor, CommandListener, JobQueue, RedisJobQueue, SystemReboot};
use crate::config::{ActuatorBackend, SensorBackend, ServiceConfig};
use crate::gateway::RedisGateway;
use crate::hardware::{Actuator, FakeSensor, MemoryActuator, SensorPort};
use crate::manager::RelayManager;
use crate::monitor::RelayMonitor;
use crate::processor::{GeneralProcessor, RelayProcessor};

/// Reading reported by the simulated sensor backend
pub const SIMULATED_READING: PowerReading = PowerReading {
    volts: 12.0,
    watts: 6.0,
    amps: 0.5,
};

/// External collaborators of the service
#[derive(Clone)]
pub struct Backends {
    pub log: Arc<dyn TelemetryLog>,
    pub sink: Arc<dyn TimeSeriesSink>,
    pub gateway: Arc<dyn CloudGateway>,
    pub actuator: Arc<dyn Actuator>,
    pub jobs: Arc<dyn JobQueue>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Production backends: Redis log, gateway and job queue, InfluxDB sink
    pub async fn connect(config: &ServiceConfig) -> Result<Self> {
        let client = RedisClient::with_config(config.redis.clone())
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", config.redis.url))?;
        info!("Connected to Redis at {}", config.redis.url);

        let sink =
            InfluxSink::new(config.influxdb.clone()).context("Failed to create InfluxDB sink")?;

        Ok(Self {
            log: Arc::new(RedisTelemetryLog::new(client.clone_client())),
            sink: Arc::new(sink),
            gateway: Arc::new(RedisGateway::new(
                client.clone_client(),
                config.service.device_id.clone(),
            )),
            actuator: build_actuator(config.service.actuator)?,
            jobs: Arc::new(RedisJobQueue::new(client, config.service.command_queue.clone())),
            clock: Arc::new(SystemClock),
        })
    }
}

/// Create the configured relay output backend
pub fn build_actuator(backend: ActuatorBackend) -> Result<Arc<dyn Actuator>> {
    match backend {
        ActuatorBackend::Memory => {
            warn!("Using in-memory relay outputs (simulation)");
            Ok(Arc::new(MemoryActuator::new()))
        },
        #[cfg(all(feature = "gpio", target_os = "linux"))]
        ActuatorBackend::Gpio => Ok(Arc::new(
            crate::hardware::GpioActuator::new().context("Failed to open GPIO")?,
        )),
        #[cfg(not(all(feature = "gpio", target_os = "linux")))]
        ActuatorBackend::Gpio => {
            anyhow::bail!("Actuator backend 'gpio' requires the gpio feature on Linux")
        },
    }
}

/// Create the power sensor of a monitored relay
pub fn build_sensor(
    config: &ServiceConfig,
    relay: &Relay,
) -> Result<Option<Box<dyn SensorPort>>> {
    if !relay.monitor {
        return Ok(None);
    }
    match config.service.sensor {
        SensorBackend::Fake => Ok(Some(Box::new(FakeSensor::constant(SIMULATED_READING)))),
        #[cfg(feature = "industrial-io")]
        SensorBackend::Ina260 => {
            let address = relay
                .sensor_bus_address()
                .with_context(|| format!("relay {}", relay.id))?;
            Ok(Some(Box::new(crate::hardware::Ina260::new(
                config.service.i2c_bus.clone(),
                address,
            ))))
        },
        #[cfg(not(feature = "industrial-io"))]
        SensorBackend::Ina260 => {
            anyhow::bail!("Sensor backend 'ina260' requires the industrial-io feature")
        },
    }
}

#[cfg(feature = "industrial-io")]
fn environment_collector(
    config: &ServiceConfig,
    gateway: Arc<dyn CloudGateway>,
) -> Result<Option<Box<dyn Collector>>> {
    let settings = &config.collectors.environment;
    let address = fleet_model::parse_hex_address(&settings.address)?;
    let source = crate::hardware::Aht10I2c::new(config.service.i2c_bus.clone(), address);
    Ok(Some(Box::new(
        crate::collectors::EnvironmentCollector::new(Box::new(source))
            .with_alerts(gateway, settings.high_temperature),
    )))
}

#[cfg(not(feature = "industrial-io"))]
fn environment_collector(
    _config: &ServiceConfig,
    _gateway: Arc<dyn CloudGateway>,
) -> Result<Option<Box<dyn Collector>>> {
    warn!("Environment collector needs the industrial-io feature; skipped");
    Ok(None)
}

/// A running relaysrv instance
pub struct RelayService {
    token: CancellationToken,
    manager: Arc<RelayManager>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl RelayService {
    /// Initialize the relays and spawn every service task
    ///
    /// Fails without spawning anything when the relays cannot be driven to
    /// their boot state.
    pub async fn start(config: &ServiceConfig, backends: Backends) -> Result<Self> {
        let Backends {
            log,
            sink,
            gateway,
            actuator,
            jobs,
            clock,
        } = backends;

        let manager = Arc::new(RelayManager::new(
            &config.relays,
            actuator,
            config.actuator_timeout(),
        )?);

        // Build fallible parts before anything is spawned
        let mut monitors = Vec::new();
        for relay in config.relays.iter().filter(|r| r.needs_monitor()) {
            let sensor = build_sensor(config, relay)?;
            monitors.push(RelayMonitor::new(
                relay.clone(),
                manager.clone(),
                sensor,
                log.clone(),
                gateway.clone(),
                clock.clone(),
                config.monitor_settings(),
            ));
        }
        let environment = if config.collectors.environment.enabled {
            environment_collector(config, gateway.clone())?
        } else {
            None
        };

        manager.init().await.context("Relay initialization failed")?;

        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        for monitor in monitors {
            let name = format!("monitor:{}", monitor.relay_id());
            tasks.push((name, monitor.spawn(token.child_token())));
        }

        for relay in config.relays.iter().filter(|r| r.monitor) {
            let processor = RelayProcessor::new(
                relay.id.clone(),
                log.clone(),
                sink.clone(),
                gateway.clone(),
                clock.clone(),
                config.relay_settings(),
            );
            tasks.push((
                format!("processor:{}", relay.id),
                tokio::spawn(processor.run(token.child_token())),
            ));
        }

        let general = GeneralProcessor::new(
            log.clone(),
            sink.clone(),
            gateway.clone(),
            clock.clone(),
            config.general_settings(),
        );
        tasks.push((
            "processor:general".to_string(),
            tokio::spawn(general.run(token.child_token())),
        ));

        let network = &config.collectors.network;
        if network.enabled {
            let probe = NetworkProbe::new(
                network.target.clone(),
                Duration::from_millis(network.timeout_ms),
            )
            .with_count(network.count);
            tasks.push((
                "collector:network".to_string(),
                tokio::spawn(run_collector(
                    Box::new(probe),
                    log.clone(),
                    clock.clone(),
                    Duration::from_secs(network.interval_secs),
                    token.child_token(),
                )),
            ));
        }

        if let Some(collector) = environment {
            tasks.push((
                "collector:environmental".to_string(),
                tokio::spawn(run_collector(
                    collector,
                    log.clone(),
                    clock.clone(),
                    Duration::from_secs(config.collectors.environment.interval_secs),
                    token.child_token(),
                )),
            ));
        }

        let reboot = Arc::new(SystemReboot::new(
            config.service.reboot_command.clone(),
            manager.clone(),
        ));
        let executor = Arc::new(CommandExecutor::new(manager.clone(), reboot, gateway, clock));
        let listener = CommandListener::new(jobs, executor, config.command_poll_timeout())
            .with_max_concurrent(config.service.max_concurrent_jobs);
        tasks.push((
            "commands".to_string(),
            tokio::spawn(listener.run(token.child_token())),
        ));

        info!(
            "relaysrv started: {} relays, {} tasks",
            config.relays.len(),
            tasks.len()
        );
        Ok(Self {
            token,
            manager,
            tasks,
        })
    }

    pub fn manager(&self) -> &Arc<RelayManager> {
        &self.manager
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(self) {
        info!("Stopping {} tasks", self.tasks.len());
        self.token.cancel();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!("Task {} ended abnormally: {}", name, e);
            }
        }
        info!("relaysrv stopped");
    }
}

/// Run with production backends until SIGINT/SIGTERM
pub async fn run(config: ServiceConfig) -> Result<()> {
    let backends = Backends::connect(&config).await?;
    let service = RelayService::start(&config, backends).await?;

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    service.shutdown().await;
    Ok(())
}
