//! Enclosure temperature and humidity

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use fleet_model::{format_timestamp, CloudGateway, STREAM_ENVIRONMENTAL, ALERTS_TOPIC};
use serde_json::json;
use tracing::{info, warn};

use super::Collector;
use crate::hardware::{decode_frame, RawFrameSource};

/// Default high-temperature alert threshold in degrees Fahrenheit
pub const DEFAULT_HIGH_TEMPERATURE: f64 = 110.0;

/// AHT10-backed environment collector
///
/// Optionally raises a `high_temperature` alert whenever a reading reaches
/// the threshold. The reading is streamed either way.
pub struct EnvironmentCollector {
    source: Box<dyn RawFrameSource>,
    alerts: Option<(Arc<dyn CloudGateway>, f64)>,
}

impl EnvironmentCollector {
    pub fn new(source: Box<dyn RawFrameSource>) -> Self {
        Self {
            source,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, gateway: Arc<dyn CloudGateway>, threshold: f64) -> Self {
        self.alerts = Some((gateway, threshold));
        self
    }
}

#[async_trait]
impl Collector for EnvironmentCollector {
    fn stream(&self) -> &str {
        STREAM_ENVIRONMENTAL
    }

    async fn collect(&mut self) -> anyhow::Result<BTreeMap<String, f64>> {
        let frame = self
            .source
            .read_frame()
            .await
            .context("AHT10 read failed")?;
        let reading = decode_frame(&frame);

        if let Some((gateway, threshold)) = &self.alerts {
            if reading.temperature >= *threshold {
                info!(
                    "High temperature {} F (threshold {} F)",
                    reading.temperature, threshold
                );
                let payload = json!({
                    "source": STREAM_ENVIRONMENTAL,
                    "alert_type": "high_temperature",
                    "level": "warning",
                    "value": reading.temperature,
                    "message": format!("Enclosure temperature at or above {} F", threshold),
                    "timestamp": format_timestamp(&chrono::Utc::now()),
                });
                if let Err(e) = gateway.publish(ALERTS_TOPIC, payload).await {
                    warn!("High temperature alert not delivered: {}", e);
                }
            }
        }

        Ok(BTreeMap::from([
            ("temperature".to_string(), reading.temperature),
            ("humidity".to_string(), reading.humidity),
        ]))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::hardware::SensorError;
    use fleet_model::MemoryGateway;

    struct StaticFrame(Option<[u8; 6]>);

    #[async_trait]
    impl RawFrameSource for StaticFrame {
        async fn read_frame(&mut self) -> Result<[u8; 6], SensorError> {
            self.0.ok_or_else(|| SensorError::Bus("nack".into()))
        }
    }

    // 50 % humidity, 122.0 F
    const HOT: [u8; 6] = [0x1C, 0x80, 0x00, 0x08, 0x00, 0x00];
    // 0 % humidity, -58.0 F
    const COLD: [u8; 6] = [0; 6];

    #[tokio::test]
    async fn test_collect_fields() {
        let mut collector = EnvironmentCollector::new(Box::new(StaticFrame(Some(HOT))));
        let fields = collector.collect().await.unwrap();
        assert_eq!(fields["temperature"], 122.0);
        assert_eq!(fields["humidity"], 50.0);
    }

    #[tokio::test]
    async fn test_high_temperature_alert() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut hot = EnvironmentCollector::new(Box::new(StaticFrame(Some(HOT))))
            .with_alerts(gateway.clone(), DEFAULT_HIGH_TEMPERATURE);
        let mut cold = EnvironmentCollector::new(Box::new(StaticFrame(Some(COLD))))
            .with_alerts(gateway.clone(), DEFAULT_HIGH_TEMPERATURE);

        hot.collect().await.unwrap();
        cold.collect().await.unwrap();

        let alerts = gateway.published_on(ALERTS_TOPIC);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["alert_type"], "high_temperature");
        assert_eq!(alerts[0]["value"], 122.0);
    }

    #[tokio::test]
    async fn test_failed_alert_still_streams() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.set_failing(true);
        let mut collector = EnvironmentCollector::new(Box::new(StaticFrame(Some(HOT))))
            .with_alerts(gateway, DEFAULT_HIGH_TEMPERATURE);

        assert!(collector.collect().await.is_ok());
    }

    #[tokio::test]
    async fn test_read_failure_is_error() {
        let mut collector = EnvironmentCollector::new(Box::new(StaticFrame(None)));
        let err = collector.collect().await.unwrap_err();
        assert!(format!("{:#}", err).contains("nack"));
    }
}
