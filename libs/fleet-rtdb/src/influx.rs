//! InfluxDB 2.x sink over the HTTP write API

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::point::DataPoint;
use crate::traits::TimeSeriesSink;

/// InfluxDB connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    /// API token, sent as `Authorization: Token ...`
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            org: String::new(),
            bucket: String::new(),
            token: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Writes points as line protocol to `/api/v2/write`
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build InfluxDB HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxSink {
    async fn write(&self, points: &[DataPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = points
            .iter()
            .map(DataPoint::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        let url = format!("{}/api/v2/write", self.config.url.trim_end_matches('/'));

        let mut request = self
            .client
            .post(&url)
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);

        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach InfluxDB at {}", self.config.url))?;

        if response.status().is_success() {
            debug!("Wrote {} points to InfluxDB", points.len());
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("InfluxDB write failed: {} - {}", status, body);
            bail!("InfluxDB write failed: {} - {}", status, body)
        }
    }
}
