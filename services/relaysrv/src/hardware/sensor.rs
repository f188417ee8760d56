//! Power sensor port

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fleet_model::PowerReading;
use thiserror::Error;

/// Sensor failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SensorError {
    #[error("Sensor initialization failed: {0}")]
    Init(String),

    #[error("Sensor bus error: {0}")]
    Bus(String),

    #[error("Sensor read timed out after {0} ms")]
    Timeout(u64),
}

/// One power sensor attached to a relay
#[async_trait]
pub trait SensorPort: Send + 'static {
    /// Probe the device; a failure disables monitoring for the relay
    async fn initialize(&mut self) -> Result<(), SensorError>;

    async fn read(&mut self) -> Result<PowerReading, SensorError>;
}

/// Scripted sensor for simulation and tests
///
/// Replays queued results in order, then repeats `fallback` (or fails when
/// there is none).
#[derive(Debug, Default)]
pub struct FakeSensor {
    script: VecDeque<Result<PowerReading, SensorError>>,
    fallback: Option<PowerReading>,
    init_error: Option<String>,
    reads: Arc<AtomicUsize>,
}

impl FakeSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensor that always reports `reading`
    pub fn constant(reading: PowerReading) -> Self {
        Self {
            fallback: Some(reading),
            ..Self::default()
        }
    }

    pub fn push(mut self, result: Result<PowerReading, SensorError>) -> Self {
        self.script.push_back(result);
        self
    }

    pub fn failing_init(mut self, message: impl Into<String>) -> Self {
        self.init_error = Some(message.into());
        self
    }

    /// Shared read counter, usable after the sensor moved into a monitor
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

#[async_trait]
impl SensorPort for FakeSensor {
    async fn initialize(&mut self) -> Result<(), SensorError> {
        match &self.init_error {
            Some(message) => Err(SensorError::Init(message.clone())),
            None => Ok(()),
        }
    }

    async fn read(&mut self) -> Result<PowerReading, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.script.pop_front() {
            return result;
        }
        self.fallback
            .ok_or_else(|| SensorError::Bus("no scripted reading".into()))
    }
}
