//! Fleet RTDB
//!
//! Storage seams of the relay fleet controller:
//!
//! ```text
//! producers ──append──▶ TelemetryLog ──read_group/ack──▶ processors ──write──▶ TimeSeriesSink
//!                      (Redis Streams)                                      (InfluxDB)
//! ```
//!
//! Both seams have in-memory backends so the control and processing loops
//! can be tested without servers.

pub mod influx;
pub mod memory_impl;
pub mod point;
pub mod redis_impl;
pub mod traits;

pub use influx::{InfluxConfig, InfluxSink};
pub use memory_impl::{MemorySink, MemoryTelemetryLog};
pub use point::{DataPoint, LineProtocolBuilder};
pub use redis_impl::RedisTelemetryLog;
pub use traits::{ReadCursor, StreamEntry, TelemetryLog, TimeSeriesSink};
