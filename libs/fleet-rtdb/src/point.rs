//! Time-series points and InfluxDB line protocol

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

/// One time-series point
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl DataPoint {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Line protocol with a nanosecond timestamp
    pub fn to_line_protocol(&self) -> String {
        let mut builder = LineProtocolBuilder::new(&self.measurement)
            .timestamp(self.timestamp.timestamp_nanos_opt().unwrap_or(0));
        for (key, value) in &self.tags {
            builder = builder.tag(key, value);
        }
        for (key, value) in &self.fields {
            builder = builder.field(key, *value);
        }
        builder.build()
    }
}

/// `InfluxDB` line protocol builder
#[derive(Debug)]
pub struct LineProtocolBuilder {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, f64)>,
    timestamp: Option<i64>,
}

impl LineProtocolBuilder {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Nanoseconds since the epoch
    #[must_use]
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> String {
        let mut result = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            let _ = write!(result, ",{}={}", escape_key(key), escape_key(value));
        }

        result.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape_key(key), value))
            .collect();
        result.push_str(&fields.join(","));

        if let Some(ts) = self.timestamp {
            let _ = write!(result, " {ts}");
        }

        result
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

// Tag keys, tag values and field keys share one escaping rule
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
