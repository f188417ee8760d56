//! Clock abstraction
//!
//! Separates time acquisition from control logic so schedule decisions and
//! sample timestamps are deterministic in tests.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Current UTC instant, used for telemetry timestamps
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current local wall time, used for schedule windows
    fn now_local(&self) -> NaiveDateTime;
}

/// System clock using the host's time zone for local time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock for tests
///
/// Local time equals UTC time.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.now.lock().and_utc()
    }

    fn now_local(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}
