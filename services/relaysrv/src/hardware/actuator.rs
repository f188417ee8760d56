//! Relay output actuators

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

/// Actuator failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActuatorError {
    #[error("Pin {0} is not configured as output")]
    UnconfiguredPin(u8),

    #[error("Hardware error on pin {pin}: {message}")]
    Hardware { pin: u8, message: String },

    #[error("Actuator write timed out after {0} ms")]
    Timeout(u64),

    #[error("Actuator task failed: {0}")]
    TaskFailed(String),
}

/// Digital output driver for relay pins
///
/// Calls are blocking; the relay manager runs them on the blocking pool
/// under a timeout.
pub trait Actuator: Send + Sync + 'static {
    /// Claim `pin` as an output
    fn configure_output(&self, pin: u8) -> Result<(), ActuatorError>;

    /// Drive `pin` high (`true`) or low
    fn write(&self, pin: u8, on: bool) -> Result<(), ActuatorError>;

    /// Current output level of `pin`
    fn read(&self, pin: u8) -> Result<bool, ActuatorError>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct PinState {
    level: bool,
    writes: usize,
}

/// In-memory actuator for simulation and tests
#[derive(Debug, Default)]
pub struct MemoryActuator {
    pins: Mutex<HashMap<u8, PinState>>,
    failing: Mutex<Option<String>>,
}

impl MemoryActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `message`, or recover with `None`
    pub fn set_failing(&self, message: Option<&str>) {
        *self.failing.lock() = message.map(str::to_string);
    }

    /// Number of writes that reached `pin`
    pub fn write_count(&self, pin: u8) -> usize {
        self.pins.lock().get(&pin).map_or(0, |p| p.writes)
    }

    /// Level of `pin`, `None` when never configured
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.pins.lock().get(&pin).map(|p| p.level)
    }

    fn check_failing(&self, pin: u8) -> Result<(), ActuatorError> {
        match self.failing.lock().as_ref() {
            Some(message) => Err(ActuatorError::Hardware {
                pin,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Actuator for MemoryActuator {
    fn configure_output(&self, pin: u8) -> Result<(), ActuatorError> {
        self.check_failing(pin)?;
        self.pins.lock().entry(pin).or_default();
        Ok(())
    }

    fn write(&self, pin: u8, on: bool) -> Result<(), ActuatorError> {
        self.check_failing(pin)?;
        let mut pins = self.pins.lock();
        let state = pins
            .get_mut(&pin)
            .ok_or(ActuatorError::UnconfiguredPin(pin))?;
        state.level = on;
        state.writes += 1;
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, ActuatorError> {
        self.check_failing(pin)?;
        self.pins
            .lock()
            .get(&pin)
            .map(|p| p.level)
            .ok_or(ActuatorError::UnconfiguredPin(pin))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Raspberry Pi GPIO outputs (BCM numbering)
#[cfg(all(feature = "gpio", target_os = "linux"))]
pub struct GpioActuator {
    gpio: rppal::gpio::Gpio,
    outputs: Mutex<HashMap<u8, rppal::gpio::OutputPin>>,
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
impl GpioActuator {
    pub fn new() -> Result<Self, ActuatorError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| ActuatorError::Hardware {
            pin: 0,
            message: e.to_string(),
        })?;
        Ok(Self {
            gpio,
            outputs: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
impl Actuator for GpioActuator {
    fn configure_output(&self, pin: u8) -> Result<(), ActuatorError> {
        let mut outputs = self.outputs.lock();
        if outputs.contains_key(&pin) {
            return Ok(());
        }
        let mut output = self
            .gpio
            .get(pin)
            .map_err(|e| ActuatorError::Hardware {
                pin,
                message: e.to_string(),
            })?
            .into_output();
        // Relays keep their last state when the process exits
        output.set_reset_on_drop(false);
        outputs.insert(pin, output);
        Ok(())
    }

    fn write(&self, pin: u8, on: bool) -> Result<(), ActuatorError> {
        let mut outputs = self.outputs.lock();
        let output = outputs
            .get_mut(&pin)
            .ok_or(ActuatorError::UnconfiguredPin(pin))?;
        if on {
            output.set_high();
        } else {
            output.set_low();
        }
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, ActuatorError> {
        self.outputs
            .lock()
            .get(&pin)
            .map(|o| o.is_set_high())
            .ok_or(ActuatorError::UnconfiguredPin(pin))
    }

    fn backend_name(&self) -> &'static str {
        "gpio"
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_memory_actuator_requires_configuration() {
        let actuator = MemoryActuator::new();
        assert_eq!(
            actuator.write(17, true),
            Err(ActuatorError::UnconfiguredPin(17))
        );

        actuator.configure_output(17).unwrap();
        actuator.write(17, true).unwrap();
        assert!(actuator.read(17).unwrap());
        assert_eq!(actuator.write_count(17), 1);
    }

    #[test]
    fn test_memory_actuator_failure_injection() {
        let actuator = MemoryActuator::new();
        actuator.configure_output(4).unwrap();
        actuator.set_failing(Some("bus fault"));

        let err = actuator.write(4, true).unwrap_err();
        assert_eq!(err.to_string(), "Hardware error on pin 4: bus fault");
        assert_eq!(actuator.write_count(4), 0);

        actuator.set_failing(None);
        actuator.write(4, true).unwrap();
        assert_eq!(actuator.level(4), Some(true));
    }
}
