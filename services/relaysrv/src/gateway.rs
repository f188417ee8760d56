//! Redis pub/sub cloud gateway
//!
//! The cloud bridge subscribes to `{device_id}/#`-style channels and
//! forwards them upstream; this side only publishes JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::RedisClient;
use fleet_model::{CloudGateway, CommandStatusReport};
use serde_json::Value;
use tracing::debug;

/// Publishes gateway messages on Redis channels prefixed by the device id
pub struct RedisGateway {
    client: RedisClient,
    device_id: String,
}

impl RedisGateway {
    pub fn new(client: RedisClient, device_id: impl Into<String>) -> Self {
        Self {
            client,
            device_id: device_id.into(),
        }
    }

    async fn send(&self, topic: &str, payload: Value) -> Result<()> {
        let channel = channel(&self.device_id, topic);
        let message = serde_json::to_string(&stamp(&self.device_id, payload))
            .context("Failed to serialize gateway payload")?;
        let receivers = self.client.publish(&channel, &message).await?;
        debug!("Published to {} ({} receivers)", channel, receivers);
        Ok(())
    }
}

/// Channel for a gateway topic, e.g. `edge-01/relay/data`
pub fn channel(device_id: &str, topic: &str) -> String {
    format!("{}/{}", device_id, topic)
}

/// Stamp the device id into object payloads
pub fn stamp(device_id: &str, mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("device_id".into(), Value::String(device_id.to_string()));
    }
    payload
}

#[async_trait]
impl CloudGateway for RedisGateway {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        self.send(topic, payload).await
    }

    async fn report_status(&self, report: CommandStatusReport) -> Result<()> {
        let payload = serde_json::to_value(&report).context("Failed to serialize status report")?;
        self.send(&report.topic(), payload).await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_and_stamp() {
        assert_eq!(channel("edge-01", "relay/data"), "edge-01/relay/data");

        let stamped = stamp("edge-01", json!({"volts": 12.0}));
        assert_eq!(stamped["device_id"], "edge-01");
        assert_eq!(stamped["volts"], 12.0);

        // Non-object payloads pass through
        assert_eq!(stamp("edge-01", json!([1, 2])), json!([1, 2]));
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_publish() {
        let client = RedisClient::new("redis://localhost:6379").await.unwrap();
        let gateway = RedisGateway::new(client, "edge-01");
        gateway
            .publish("alerts/data", json!({"relay_id": "router"}))
            .await
            .unwrap();
    }
}
