//! Telemetry samples and their flat stream-entry encoding

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Stream written by the network probe collector
pub const STREAM_NETWORK: &str = "network";
/// Stream reserved for cellular signal data
pub const STREAM_CELLULAR: &str = "cellular";
/// Stream written by the environment collector
pub const STREAM_ENVIRONMENTAL: &str = "environmental";

/// Mandatory timestamp key of every stream entry
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Sentinel the collectors write when a measurement is unavailable
pub const NULL_VALUE: f64 = -9999.0;

/// One immutable set of numeric readings from a relay or collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Relay id or collector name
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl TelemetrySample {
    pub fn new(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }

    /// Flat string map appended to the telemetry log
    pub fn to_stream_fields(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.fields.len() + 1);
        out.push((TIMESTAMP_FIELD.to_string(), format_timestamp(&self.timestamp)));
        for (name, value) in &self.fields {
            out.push((name.clone(), value.to_string()));
        }
        out
    }

    /// Rebuild a sample from a stream entry
    ///
    /// A missing timestamp falls back to `now`; every other field must be a
    /// finite number or the whole entry is rejected. An entry without any
    /// numeric field is rejected too.
    pub fn from_stream_fields(
        source: impl Into<String>,
        fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let timestamp = match fields.get(TIMESTAMP_FIELD) {
            Some(raw) => parse_timestamp(raw)?,
            None => now,
        };

        let mut sample = Self::new(source, timestamp);
        for (name, raw) in fields {
            if name == TIMESTAMP_FIELD {
                continue;
            }
            let value = parse_number(name, raw)?;
            sample.fields.insert(name.clone(), value);
        }
        if sample.fields.is_empty() {
            return Err(ModelError::InvalidEntry("entry has no numeric fields".into()));
        }
        Ok(sample)
    }

    /// JSON object `{source, timestamp, <fields>...}` forwarded to the cloud
    pub fn to_payload(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("source".into(), self.source.clone().into());
        map.insert(
            TIMESTAMP_FIELD.into(),
            format_timestamp(&self.timestamp).into(),
        );
        for (name, value) in &self.fields {
            map.insert(name.clone(), (*value).into());
        }
        serde_json::Value::Object(map)
    }
}

/// Voltage, power and current from a relay's power sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub volts: f64,
    pub watts: f64,
    pub amps: f64,
}

impl PowerReading {
    pub fn into_sample(
        self,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> TelemetrySample {
        TelemetrySample::new(source, timestamp)
            .with_field("volts", self.volts)
            .with_field("watts", self.watts)
            .with_field("amps", self.amps)
    }

    /// Extract volts/watts/amps from a relay stream entry
    pub fn from_stream_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let read = |name: &str| -> Result<f64> {
            let raw = fields
                .get(name)
                .ok_or_else(|| ModelError::InvalidEntry(format!("missing field {}", name)))?;
            parse_number(name, raw)
        };
        Ok(Self {
            volts: read("volts")?,
            watts: read("watts")?,
            amps: read("amps")?,
        })
    }
}

/// Round half away from zero to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// RFC 3339 UTC with microseconds, e.g. `2025-01-06T07:00:00.000000Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accept RFC 3339 with offset, or a naive ISO-8601 time taken as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ModelError::InvalidEntry(format!("bad timestamp {:?}", raw)))
}

fn parse_number(name: &str, raw: &str) -> Result<f64> {
    let value = raw.trim().parse::<f64>().map_err(|_| {
        ModelError::InvalidEntry(format!("field {} is not numeric: {:?}", name, raw))
    })?;
    if !value.is_finite() {
        return Err(ModelError::InvalidEntry(format!(
            "field {} is not finite: {:?}",
            name, raw
        )));
    }
    Ok(value)
}
