//! Redis Streams backend for the telemetry log

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::redis::RedisClient;

use crate::traits::{ReadCursor, StreamEntry, TelemetryLog};

/// Telemetry log on Redis Streams (XADD / XREADGROUP / XACK)
#[derive(Clone, Debug)]
pub struct RedisTelemetryLog {
    client: RedisClient,
}

impl RedisTelemetryLog {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }
}

#[async_trait]
impl TelemetryLog for RedisTelemetryLog {
    async fn append(&self, stream: &str, fields: Vec<(String, String)>) -> Result<String> {
        self.client.xadd(stream, &fields).await
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.client.xgroup_create(stream, group).await
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        let (id, block_ms) = match cursor {
            ReadCursor::Pending => ("0", None),
            // BLOCK 0 means forever in Redis; keep the wait bounded
            ReadCursor::New => (
                ">",
                block.map(|b| usize::try_from(b.as_millis()).unwrap_or(usize::MAX).max(1)),
            ),
        };

        let records = self
            .client
            .xreadgroup(stream, group, consumer, id, count, block_ms)
            .await?;
        Ok(records
            .into_iter()
            .map(|(id, fields)| StreamEntry { id, fields })
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64> {
        self.client.xack(stream, group, ids).await
    }
}
