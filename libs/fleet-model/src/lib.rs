//! Fleet Model Library
//!
//! Data model shared by the relay fleet controller crates.
//!
//! # Modules
//!
//! - `relay`: relay definitions and daily schedules
//! - `rule`: threshold rules, comparison operators and actions
//! - `sample`: telemetry samples, power readings and their stream encoding
//! - `gateway`: cloud gateway contract plus an in-memory implementation
//! - `clock`: wall-clock abstraction

pub mod clock;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod rule;
pub mod sample;

// Re-exports for convenience
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ModelError, Result};
pub use gateway::{
    stream_topic, CloudGateway, CommandStatus, CommandStatusReport, MemoryGateway, ALERTS_TOPIC,
    RELAY_TOPIC,
};
pub use relay::{parse_hex_address, parse_hhmm, Relay, Schedule};
pub use rule::{Action, Condition, Rule};
pub use sample::{
    format_timestamp, parse_timestamp, round2, PowerReading, TelemetrySample, NULL_VALUE,
    STREAM_CELLULAR, STREAM_ENVIRONMENTAL, STREAM_NETWORK, TIMESTAMP_FIELD,
};
