//! relaysrv configuration
//!
//! Loaded from a YAML file with `RELAYSRV_` environment overrides, where
//! `__` separates nested keys (`RELAYSRV_REDIS__URL`,
//! `RELAYSRV_SERVICE__DEVICE_ID`). Every section has defaults, so a file
//! that only lists relays is a complete configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use common::{LoggingConfig, RedisConfig};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use fleet_model::{
    parse_hex_address, Relay, STREAM_CELLULAR, STREAM_ENVIRONMENTAL, STREAM_NETWORK,
};
use fleet_rtdb::InfluxConfig;
use serde::{Deserialize, Serialize};

use crate::collectors::environment::DEFAULT_HIGH_TEMPERATURE;
use crate::collectors::network::DEFAULT_PROBE_COUNT;
use crate::commands::listener::{COMMAND_QUEUE, DEFAULT_MAX_CONCURRENT_JOBS};
use crate::monitor::MonitorSettings;
use crate::processor::{GeneralSettings, RelaySettings};

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/relaysrv.yaml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RELAYSRV_";

/// Relay output backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorBackend {
    /// In-memory pins (simulation)
    #[default]
    Memory,
    /// Raspberry Pi GPIO, requires the `gpio` feature
    Gpio,
}

/// Power sensor backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    /// Constant simulated readings
    #[default]
    Fake,
    /// INA260 over I2C, requires the `industrial-io` feature
    Ina260,
}

/// Node-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Identity used in gateway channels and payloads
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_sensor_interval_ms")]
    pub sensor_interval_ms: u64,
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,
    /// Bound for a single actuator write
    #[serde(default = "default_actuator_timeout_ms")]
    pub actuator_timeout_ms: u64,
    #[serde(default)]
    pub actuator: ActuatorBackend,
    #[serde(default)]
    pub sensor: SensorBackend,
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: String,
    /// Redis list holding inbound job documents
    #[serde(default = "default_command_queue")]
    pub command_queue: String,
    #[serde(default = "default_command_poll_secs")]
    pub command_poll_secs: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_reboot_command")]
    pub reboot_command: Vec<String>,
}

fn default_device_id() -> String {
    "relay-node".to_string()
}

fn default_schedule_interval_secs() -> u64 {
    60
}

fn default_sensor_interval_ms() -> u64 {
    1000
}

fn default_sensor_timeout_ms() -> u64 {
    500
}

fn default_actuator_timeout_ms() -> u64 {
    2000
}

fn default_i2c_bus() -> String {
    "/dev/i2c-1".to_string()
}

fn default_command_queue() -> String {
    COMMAND_QUEUE.to_string()
}

fn default_command_poll_secs() -> u64 {
    5
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_reboot_command() -> Vec<String> {
    vec!["sudo".to_string(), "reboot".to_string()]
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            schedule_interval_secs: default_schedule_interval_secs(),
            sensor_interval_ms: default_sensor_interval_ms(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
            actuator_timeout_ms: default_actuator_timeout_ms(),
            actuator: ActuatorBackend::default(),
            sensor: SensorBackend::default(),
            i2c_bus: default_i2c_bus(),
            command_queue: default_command_queue(),
            command_poll_secs: default_command_poll_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            reboot_command: default_reboot_command(),
        }
    }
}

/// Stream processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSection {
    /// Relay averaging window in seconds
    #[serde(default = "default_relay_window_secs")]
    pub relay_window_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Blocking read bound in milliseconds
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    #[serde(default = "default_general_interval_secs")]
    pub general_interval_secs: u64,
    #[serde(default = "default_general_streams")]
    pub general_streams: Vec<String>,
    /// Entries per general stream per cycle
    #[serde(default = "default_general_count")]
    pub general_count: usize,
}

fn default_relay_window_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    60
}

fn default_block_ms() -> u64 {
    1000
}

fn default_general_interval_secs() -> u64 {
    300
}

fn default_general_streams() -> Vec<String> {
    vec![
        STREAM_CELLULAR.to_string(),
        STREAM_NETWORK.to_string(),
        STREAM_ENVIRONMENTAL.to_string(),
    ]
}

fn default_general_count() -> usize {
    10
}

impl Default for ProcessorSection {
    fn default() -> Self {
        Self {
            relay_window_secs: default_relay_window_secs(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            general_interval_secs: default_general_interval_secs(),
            general_streams: default_general_streams(),
            general_count: default_general_count(),
        }
    }
}

/// Network probe collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `host:port` reached with TCP connects
    #[serde(default = "default_network_target")]
    pub target: String,
    #[serde(default = "default_collector_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_probe_count")]
    pub count: usize,
}

fn default_true() -> bool {
    true
}

fn default_network_target() -> String {
    "8.8.8.8:53".to_string()
}

fn default_collector_interval_secs() -> u64 {
    60
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_probe_count() -> usize {
    DEFAULT_PROBE_COUNT
}

impl Default for NetworkCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target: default_network_target(),
            interval_secs: default_collector_interval_secs(),
            timeout_ms: default_probe_timeout_ms(),
            count: default_probe_count(),
        }
    }
}

/// AHT10 environment collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentCollectorConfig {
    /// Off by default: needs the sensor and the `industrial-io` feature
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_collector_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_environment_address")]
    pub address: String,
    /// Alert threshold in °F
    #[serde(default = "default_high_temperature")]
    pub high_temperature: f64,
}

fn default_environment_address() -> String {
    "0x38".to_string()
}

fn default_high_temperature() -> f64 {
    DEFAULT_HIGH_TEMPERATURE
}

impl Default for EnvironmentCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_collector_interval_secs(),
            address: default_environment_address(),
            high_temperature: default_high_temperature(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorSection {
    #[serde(default)]
    pub network: NetworkCollectorConfig,
    #[serde(default)]
    pub environment: EnvironmentCollectorConfig,
}

/// Complete relaysrv configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub influxdb: InfluxConfig,
    #[serde(default)]
    pub processors: ProcessorSection,
    #[serde(default)]
    pub collectors: CollectorSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Relays in declaration order
    #[serde(default)]
    pub relays: Vec<Relay>,
}

impl ServiceConfig {
    /// Load from `path` plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Configuration file not found: {}", path.display());
        }

        Figment::from(Serialized::defaults(ServiceConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Structural checks; the service refuses to start when this fails
    pub fn validate(&self) -> Result<()> {
        if self.service.device_id.trim().is_empty() {
            bail!("service.device_id cannot be empty");
        }
        let intervals = [
            ("service.schedule_interval_secs", self.service.schedule_interval_secs),
            ("service.sensor_interval_ms", self.service.sensor_interval_ms),
            ("service.sensor_timeout_ms", self.service.sensor_timeout_ms),
            ("service.actuator_timeout_ms", self.service.actuator_timeout_ms),
            ("service.command_poll_secs", self.service.command_poll_secs),
            ("processors.relay_window_secs", self.processors.relay_window_secs),
            ("processors.block_ms", self.processors.block_ms),
            ("processors.general_interval_secs", self.processors.general_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.processors.batch_size == 0 || self.processors.general_count == 0 {
            bail!("Processor read counts must be greater than zero");
        }
        if self.processors.general_streams.iter().any(|s| s.trim().is_empty()) {
            bail!("processors.general_streams cannot contain empty names");
        }

        if self.redis.url.is_empty() {
            bail!("Redis URL cannot be empty");
        }
        if self.influxdb.url.is_empty() {
            bail!("InfluxDB URL cannot be empty");
        }

        let network = &self.collectors.network;
        if network.enabled {
            if !network.target.contains(':') {
                bail!("collectors.network.target must be host:port, got '{}'", network.target);
            }
            if network.interval_secs == 0 || network.count == 0 {
                bail!("collectors.network interval and count must be greater than zero");
            }
        }
        let environment = &self.collectors.environment;
        if environment.enabled {
            parse_hex_address(&environment.address)
                .context("collectors.environment.address")?;
            if environment.interval_secs == 0 {
                bail!("collectors.environment.interval_secs must be greater than zero");
            }
            if !environment.high_temperature.is_finite() {
                bail!("collectors.environment.high_temperature must be finite");
            }
        }

        self.validate_relays()
    }

    fn validate_relays(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut pins = HashSet::new();
        for relay in &self.relays {
            relay
                .validate()
                .with_context(|| format!("Invalid relay '{}'", relay.id))?;
            if !ids.insert(relay.id.as_str()) {
                bail!("Duplicate relay id '{}'", relay.id);
            }
            if !pins.insert(relay.pin) {
                bail!("Relay '{}' reuses pin {}", relay.id, relay.pin);
            }
        }
        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            schedule_interval: Duration::from_secs(self.service.schedule_interval_secs),
            sensor_interval: Duration::from_millis(self.service.sensor_interval_ms),
            sensor_timeout: Duration::from_millis(self.service.sensor_timeout_ms),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            window: Duration::from_secs(self.processors.relay_window_secs),
            batch_size: self.processors.batch_size,
            block: Duration::from_millis(self.processors.block_ms),
        }
    }

    pub fn general_settings(&self) -> GeneralSettings {
        GeneralSettings {
            interval: Duration::from_secs(self.processors.general_interval_secs),
            streams: self.processors.general_streams.clone(),
            count: self.processors.general_count,
            block: Duration::from_millis(self.processors.block_ms),
        }
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.service.actuator_timeout_ms)
    }

    pub fn command_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.service.command_poll_secs)
    }
}
