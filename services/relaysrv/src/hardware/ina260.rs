//! INA260 power monitor
//!
//! Register decoding is pure; the I2C device itself is only built with the
//! `industrial-io` feature.

use fleet_model::{round2, PowerReading};

/// Current register
pub const REG_CURRENT: u8 = 0x01;
/// Bus voltage register
pub const REG_BUS_VOLTAGE: u8 = 0x02;
/// Power register
pub const REG_POWER: u8 = 0x03;
/// Manufacturer id register
pub const REG_MANUFACTURER_ID: u8 = 0xFE;
/// "TI"
pub const MANUFACTURER_ID: u16 = 0x5449;

/// Raw register words as read from the device (big-endian already swapped)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ina260Registers {
    pub current: u16,
    pub bus_voltage: u16,
    pub power: u16,
}

impl Ina260Registers {
    /// Bus voltage, LSB 1.25 mV
    pub fn volts(&self) -> f64 {
        round2(f64::from(self.bus_voltage) * 1.25 / 1000.0)
    }

    /// Current, LSB 1.25 mA, two's complement
    pub fn amps(&self) -> f64 {
        round2(f64::from(self.current as i16) * 1.25 / 1000.0)
    }

    /// Power, LSB 10 mW
    pub fn watts(&self) -> f64 {
        round2(f64::from(self.power) * 10.0 / 1000.0)
    }

    pub fn reading(&self) -> PowerReading {
        PowerReading {
            volts: self.volts(),
            watts: self.watts(),
            amps: self.amps(),
        }
    }
}

#[cfg(feature = "industrial-io")]
pub use device::Ina260;

#[cfg(feature = "industrial-io")]
mod device {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fleet_model::PowerReading;
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;
    use parking_lot::Mutex;
    use tracing::debug;

    use super::{
        Ina260Registers, MANUFACTURER_ID, REG_BUS_VOLTAGE, REG_CURRENT, REG_MANUFACTURER_ID,
        REG_POWER,
    };
    use crate::hardware::sensor::{SensorError, SensorPort};

    /// INA260 on a Linux I2C bus
    pub struct Ina260 {
        bus: String,
        address: u16,
        device: Option<Arc<Mutex<LinuxI2CDevice>>>,
    }

    impl Ina260 {
        pub fn new(bus: impl Into<String>, address: u16) -> Self {
            Self {
                bus: bus.into(),
                address,
                device: None,
            }
        }
    }

    fn read_word(device: &mut LinuxI2CDevice, register: u8) -> Result<u16, SensorError> {
        device
            .smbus_read_word_data(register)
            .map(u16::swap_bytes)
            .map_err(|e| SensorError::Bus(format!("register 0x{:02X}: {}", register, e)))
    }

    #[async_trait]
    impl SensorPort for Ina260 {
        async fn initialize(&mut self) -> Result<(), SensorError> {
            let bus = self.bus.clone();
            let address = self.address;
            let device = tokio::task::spawn_blocking(move || {
                let mut device = LinuxI2CDevice::new(&bus, address)
                    .map_err(|e| SensorError::Init(format!("{} @0x{:02X}: {}", bus, address, e)))?;
                let id = read_word(&mut device, REG_MANUFACTURER_ID)
                    .map_err(|e| SensorError::Init(e.to_string()))?;
                if id != MANUFACTURER_ID {
                    return Err(SensorError::Init(format!(
                        "unexpected manufacturer id 0x{:04X} at 0x{:02X}",
                        id, address
                    )));
                }
                Ok(device)
            })
            .await
            .map_err(|e| SensorError::Init(e.to_string()))??;

            debug!("INA260 ready on {} @0x{:02X}", self.bus, self.address);
            self.device = Some(Arc::new(Mutex::new(device)));
            Ok(())
        }

        async fn read(&mut self) -> Result<PowerReading, SensorError> {
            let device = self
                .device
                .clone()
                .ok_or_else(|| SensorError::Bus("sensor not initialized".into()))?;
            tokio::task::spawn_blocking(move || {
                let mut device = device.lock();
                let registers = Ina260Registers {
                    current: read_word(&mut device, REG_CURRENT)?,
                    bus_voltage: read_word(&mut device, REG_BUS_VOLTAGE)?,
                    power: read_word(&mut device, REG_POWER)?,
                };
                Ok(registers.reading())
            })
            .await
            .map_err(|e| SensorError::Bus(e.to_string()))?
        }
    }
}
