//! Hardware ports
//!
//! Relay outputs and power sensors sit behind small traits so the control
//! loops never depend on a particular bus library:
//!
//! - `Actuator`: relay output pins (blocking; run on the blocking pool)
//! - `SensorPort`: one power sensor per monitored relay
//!
//! Real backends are feature-gated (`gpio`, `industrial-io`); memory and
//! scripted backends are always available for simulation and tests.

pub mod actuator;
pub mod aht10;
pub mod ina260;
pub mod sensor;

pub use actuator::{Actuator, ActuatorError, MemoryActuator};
pub use aht10::{decode_frame, EnvironmentReading, RawFrameSource};
pub use ina260::Ina260Registers;
pub use sensor::{FakeSensor, SensorError, SensorPort};

#[cfg(all(feature = "gpio", target_os = "linux"))]
pub use actuator::GpioActuator;

#[cfg(feature = "industrial-io")]
pub use aht10::Aht10I2c;
#[cfg(feature = "industrial-io")]
pub use ina260::Ina260;
