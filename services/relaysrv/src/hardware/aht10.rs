//! AHT10 temperature and humidity sensor

use async_trait::async_trait;

use super::sensor::SensorError;

/// Default bus address
pub const AHT10_ADDRESS: u16 = 0x38;

/// Decoded AHT10 measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    /// Relative humidity in percent, one decimal
    pub humidity: f64,
    /// Temperature in degrees Fahrenheit, one decimal
    pub temperature: f64,
}

/// Source of raw 6-byte measurement frames
#[async_trait]
pub trait RawFrameSource: Send + 'static {
    async fn read_frame(&mut self) -> Result<[u8; 6], SensorError>;
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Decode a measurement frame (status byte first)
pub fn decode_frame(frame: &[u8; 6]) -> EnvironmentReading {
    let raw_humidity =
        (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_temperature =
        ((u32::from(frame[3]) & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

    let humidity = f64::from(raw_humidity) * 100.0 / 1_048_576.0;
    let celsius = f64::from(raw_temperature) * 200.0 / 1_048_576.0 - 50.0;

    EnvironmentReading {
        humidity: round1(humidity),
        temperature: round1(celsius * 9.0 / 5.0 + 32.0),
    }
}

#[cfg(feature = "industrial-io")]
pub use device::Aht10I2c;

#[cfg(feature = "industrial-io")]
mod device {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;
    use parking_lot::Mutex;

    use super::RawFrameSource;
    use crate::hardware::sensor::SensorError;

    const CMD_INIT: [u8; 3] = [0xE1, 0x08, 0x00];
    const CMD_MEASURE: [u8; 3] = [0xAC, 0x33, 0x00];
    const MEASURE_DELAY: Duration = Duration::from_millis(50);

    /// AHT10 on a Linux I2C bus
    pub struct Aht10I2c {
        bus: String,
        address: u16,
        device: Option<Arc<Mutex<LinuxI2CDevice>>>,
    }

    impl Aht10I2c {
        pub fn new(bus: impl Into<String>, address: u16) -> Self {
            Self {
                bus: bus.into(),
                address,
                device: None,
            }
        }

        async fn device(&mut self) -> Result<Arc<Mutex<LinuxI2CDevice>>, SensorError> {
            if let Some(device) = &self.device {
                return Ok(device.clone());
            }
            let bus = self.bus.clone();
            let address = self.address;
            let device = tokio::task::spawn_blocking(move || {
                let mut device = LinuxI2CDevice::new(&bus, address)
                    .map_err(|e| SensorError::Init(format!("{} @0x{:02X}: {}", bus, address, e)))?;
                device
                    .write(&CMD_INIT)
                    .map_err(|e| SensorError::Init(e.to_string()))?;
                std::thread::sleep(Duration::from_millis(10));
                Ok::<_, SensorError>(device)
            })
            .await
            .map_err(|e| SensorError::Init(e.to_string()))??;

            let device = Arc::new(Mutex::new(device));
            self.device = Some(device.clone());
            Ok(device)
        }
    }

    #[async_trait]
    impl RawFrameSource for Aht10I2c {
        async fn read_frame(&mut self) -> Result<[u8; 6], SensorError> {
            let device = self.device().await?;

            let trigger = device.clone();
            tokio::task::spawn_blocking(move || {
                trigger
                    .lock()
                    .write(&CMD_MEASURE)
                    .map_err(|e| SensorError::Bus(e.to_string()))
            })
            .await
            .map_err(|e| SensorError::Bus(e.to_string()))??;

            tokio::time::sleep(MEASURE_DELAY).await;

            tokio::task::spawn_blocking(move || {
                let mut frame = [0u8; 6];
                device
                    .lock()
                    .read(&mut frame)
                    .map_err(|e| SensorError::Bus(e.to_string()))?;
                Ok(frame)
            })
            .await
            .map_err(|e| SensorError::Bus(e.to_string()))?
        }
    }
}
