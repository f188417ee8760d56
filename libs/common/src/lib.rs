//! Relay fleet basic library
//!
//! Provides basic functions shared by all services, including:
//! - Redis client (pooled, with stream and list commands)
//! - logging bootstrap
//! - graceful shutdown

pub mod error;
pub mod logging;
pub mod redis;
pub mod shutdown;

pub use crate::error::{Error, Result};
pub use crate::logging::{init_logging, LoggingConfig};
pub use crate::redis::{RedisClient, RedisConfig, StreamRecord};
pub use crate::shutdown::wait_for_shutdown;

pub use tokio_util::sync::CancellationToken;
