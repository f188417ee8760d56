//! Relay and schedule definitions

use std::collections::HashSet;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::rule::Rule;

/// A controllable load (router, camera, auxiliary)
///
/// `pin` and `sensor_address` are fixed for the process lifetime; the live
/// on/off state is owned by the relay manager, not by this definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relay {
    /// Stable key, also the name of the relay's telemetry stream
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Actuator address (BCM pin number on GPIO backends)
    pub pin: u8,
    /// Power sensor bus address as a hex string, e.g. "0x40"
    #[serde(alias = "address", default = "default_sensor_address")]
    pub sensor_address: String,
    /// State forced once at startup
    #[serde(default)]
    pub boot_power: bool,
    /// Whether a power sensor is attached
    #[serde(default)]
    pub monitor: bool,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Threshold rules in evaluation order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_sensor_address() -> String {
    "0x40".to_string()
}

impl Relay {
    /// True when a schedule is present and enabled
    pub fn schedule_enabled(&self) -> bool {
        self.schedule.as_ref().is_some_and(|s| s.enabled)
    }

    /// True when this relay needs a monitor task
    pub fn needs_monitor(&self) -> bool {
        self.monitor || self.schedule_enabled()
    }

    /// Parse `sensor_address` ("0x40", "40") into a bus address
    pub fn sensor_bus_address(&self) -> Result<u16> {
        parse_hex_address(&self.sensor_address)
    }

    /// Structural checks on a single relay definition
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ModelError::Validation("relay id must not be empty".into()));
        }
        if self.monitor {
            self.sensor_bus_address()?;
        }
        if let Some(schedule) = &self.schedule {
            schedule
                .validate()
                .map_err(|e| ModelError::Validation(format!("relay {}: {}", self.id, e)))?;
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ModelError::Validation(format!(
                    "relay {}: duplicate rule id {}",
                    self.id, rule.id
                )));
            }
            rule.validate()
                .map_err(|e| ModelError::Validation(format!("relay {}: {}", self.id, e)))?;
        }

        Ok(())
    }
}

/// Parse a hex bus address with or without `0x` prefix
pub fn parse_hex_address(raw: &str) -> Result<u16> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 16).map_err(|_| ModelError::InvalidAddress(raw.to_string()))
}

/// Daily on/off window for a relay
///
/// Times are `HH:MM` strings compared lexicographically within one calendar
/// day. Windows spanning midnight are not supported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub every_day: bool,
    /// Weekday names, case-insensitive ("monday", "Mon")
    #[serde(default)]
    pub days: HashSet<Weekday>,
    pub on_time: String,
    pub off_time: String,
}

impl Schedule {
    /// Check the schedule invariants
    pub fn validate(&self) -> Result<()> {
        parse_hhmm(&self.on_time)?;
        parse_hhmm(&self.off_time)?;
        if self.enabled && !self.every_day && self.days.is_empty() {
            return Err(ModelError::InvalidSchedule(
                "days must be provided when every_day is false".into(),
            ));
        }
        Ok(())
    }

    /// True for an empty window (`on_time == off_time`), never on
    pub fn is_empty_window(&self) -> bool {
        self.on_time == self.off_time
    }
}

/// Parse a zero-padded `HH:MM` string into (hour, minute)
pub fn parse_hhmm(raw: &str) -> Result<(u32, u32)> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 5
        && bytes[2] == b':'
        && bytes[..2].iter().all(u8::is_ascii_digit)
        && bytes[3..].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return Err(ModelError::InvalidTime(raw.to_string()));
    }

    let hour: u32 = raw[..2]
        .parse()
        .map_err(|_| ModelError::InvalidTime(raw.to_string()))?;
    let minute: u32 = raw[3..]
        .parse()
        .map_err(|_| ModelError::InvalidTime(raw.to_string()))?;
    if hour > 23 || minute > 59 {
        return Err(ModelError::InvalidTime(raw.to_string()));
    }
    Ok((hour, minute))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_relay_from_yaml_with_aliases() {
        let yaml = r#"
id: router
name: Router
pin: 17
address: "0x41"
boot_power: true
monitor: true
schedule:
  enabled: true
  every_day: false
  days: [monday, Friday]
  on_time: "06:00"
  off_time: "18:00"
"#;
        let relay: Relay = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(relay.sensor_address, "0x41");
        assert_eq!(relay.sensor_bus_address().unwrap(), 0x41);
        assert!(relay.needs_monitor());
        let schedule = relay.schedule.as_ref().unwrap();
        assert!(schedule.days.contains(&Weekday::Mon));
        assert!(schedule.days.contains(&Weekday::Fri));
        relay.validate().unwrap();
    }

    #[test]
    fn test_schedule_requires_days_unless_every_day() {
        let schedule = Schedule {
            enabled: true,
            every_day: false,
            days: HashSet::new(),
            on_time: "06:00".into(),
            off_time: "18:00".into(),
        };
        assert!(matches!(
            schedule.validate(),
            Err(ModelError::InvalidSchedule(_))
        ));

        let every_day = Schedule {
            every_day: true,
            ..schedule
        };
        every_day.validate().unwrap();
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("06:05").unwrap(), (6, 5));
        assert_eq!(parse_hhmm("23:59").unwrap(), (23, 59));
        assert!(parse_hhmm("6:05").is_err());
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("12:60").is_err());
        assert!(parse_hhmm("ab:cd").is_err());
    }

    #[test]
    fn test_parse_hex_address() {
        assert_eq!(parse_hex_address("0x40").unwrap(), 0x40);
        assert_eq!(parse_hex_address("44").unwrap(), 0x44);
        assert!(parse_hex_address("zz").is_err());
    }
}
