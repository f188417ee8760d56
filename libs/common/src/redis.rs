//! Redis client module with connection pooling
//!
//! Async pooled client exposing the list, pub/sub and stream commands the
//! relay fleet services rely on.

use anyhow::{Context, Result};
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Redis connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    ///
    /// Every blocking stream reader holds one connection while it waits.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of idle connections
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Maximum lifetime of a connection in seconds
    #[serde(default)]
    pub max_lifetime: Option<u64>,
    /// Idle timeout in seconds
    #[serde(default)]
    pub idle_timeout: Option<u64>,
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_max_connections() -> u32 {
    32
}

fn default_connection_timeout() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            min_idle: Some(2),
            connection_timeout: default_connection_timeout(),
            max_lifetime: Some(3600), // 1 hour
            idle_timeout: Some(600),  // 10 minutes
        }
    }
}

impl RedisConfig {
    /// Create config from URL with default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// One entry read from a stream: its id and its field map
pub type StreamRecord = (String, BTreeMap<String, String>);

/// Redis asynchronous client with connection pooling
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    url: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.url)
            .field("pool_state", &self.pool.state())
            .finish()
    }
}

impl RedisClient {
    /// Create a new client with default configuration
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_config(RedisConfig::from_url(url)).await
    }

    /// Create a new client with custom configuration and verify it with PING
    pub async fn with_config(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .context("Failed to create Redis connection manager")?;

        let mut pool_builder = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout));

        if let Some(min_idle) = config.min_idle {
            pool_builder = pool_builder.min_idle(Some(min_idle));
        }

        if let Some(max_lifetime) = config.max_lifetime {
            pool_builder = pool_builder.max_lifetime(Some(Duration::from_secs(max_lifetime)));
        }

        if let Some(idle_timeout) = config.idle_timeout {
            pool_builder = pool_builder.idle_timeout(Some(Duration::from_secs(idle_timeout)));
        }

        let pool = pool_builder
            .build(manager)
            .await
            .context("Failed to build Redis connection pool")?;

        let client = Self {
            pool: Arc::new(pool),
            url: config.url,
        };
        client.ping().await?;

        Ok(client)
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .context("Failed to get connection from pool")
    }

    /// PING operation - test connection
    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to PING Redis server")
    }

    /// PUBLISH operation
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        conn.publish(channel, message)
            .await
            .with_context(|| format!("Failed to PUBLISH to channel: {}", channel))
    }

    /// BLPOP operation - blocking list pop
    /// Returns Some((key, value)) or None (timeout)
    pub async fn blpop(&self, keys: &[&str], timeout: usize) -> Result<Option<(String, String)>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to BLPOP from keys: {:?}", keys))
    }

    /// RPUSH operation - add element to list tail
    ///
    /// Producer half of the BLPOP job queues: the cloud bridge enqueues job
    /// documents with it.
    pub async fn rpush(&self, key: &str, value: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        conn.rpush(key, value)
            .await
            .with_context(|| format!("Failed to RPUSH to key: {}", key))
    }

    /// XADD with a server-assigned id; returns the new entry id
    pub async fn xadd(&self, key: &str, fields: &[(String, String)]) -> Result<String> {
        let mut conn = self.get_connection().await?;
        conn.xadd(key, "*", fields)
            .await
            .with_context(|| format!("Failed to XADD to stream: {}", key))
    }

    /// Create a consumer group (and the stream if missing)
    ///
    /// An existing group is not an error.
    pub async fn xgroup_create(&self, key: &str, group: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(key, group, "0").await;
        match created {
            Ok(()) => {
                debug!("Created consumer group {} on {}", group, key);
                Ok(())
            },
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to XGROUP CREATE {} on stream: {}", group, key)
            }),
        }
    }

    /// XREADGROUP on a single stream
    ///
    /// `id` is `">"` for new entries or `"0"` for this consumer's pending
    /// entries. `block_ms` of `None` returns immediately.
    pub async fn xreadgroup(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        id: &str,
        count: usize,
        block_ms: Option<usize>,
    ) -> Result<Vec<StreamRecord>> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        if let Some(ms) = block_ms {
            options = options.block(ms);
        }

        let mut conn = self.get_connection().await?;
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[key], &[id], &options)
            .await
            .with_context(|| format!("Failed to XREADGROUP {} from stream: {}", group, key))?;

        let mut records = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                let mut fields = BTreeMap::new();
                for (name, value) in entry.map {
                    match redis::from_redis_value::<String>(&value) {
                        Ok(text) => {
                            fields.insert(name, text);
                        },
                        Err(e) => warn!("Skipping field {} of {}: {}", name, entry.id, e),
                    }
                }
                records.push((entry.id, fields));
            }
        }

        Ok(records)
    }

    /// XACK the given entry ids; returns how many were acknowledged
    pub async fn xack(&self, key: &str, group: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_connection().await?;
        conn.xack(key, group, ids)
            .await
            .with_context(|| format!("Failed to XACK {} ids on stream: {}", ids.len(), key))
    }

    /// Get pool statistics
    pub fn pool_state(&self) -> bb8::State {
        self.pool.state()
    }

    /// Clone the client (shares the same connection pool)
    pub fn clone_client(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            url: self.url.clone(),
        }
    }
}

// Clone implementation for sharing across threads
impl Clone for RedisClient {
    fn clone(&self) -> Self {
        self.clone_client()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_partial_yaml() {
        let config: RedisConfig = serde_yaml::from_str("url: redis://10.0.0.5:6379").unwrap();
        assert_eq!(config.url, "redis://10.0.0.5:6379");
        assert_eq!(config.max_connections, 32);
        assert_eq!(config.connection_timeout, 5);
        assert!(config.min_idle.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_stream_group_roundtrip() {
        let client = RedisClient::new("redis://localhost:6379").await.unwrap();
        let stream = "common_test_stream";
        let group = "common_test_group";

        client.xgroup_create(stream, group).await.unwrap();
        // Second create hits BUSYGROUP and is tolerated
        client.xgroup_create(stream, group).await.unwrap();

        let id = client
            .xadd(stream, &[("volts".to_string(), "12.5".to_string())])
            .await
            .unwrap();

        let records = client
            .xreadgroup(stream, group, "c1", ">", 10, Some(100))
            .await
            .unwrap();
        assert!(records.iter().any(|(rid, f)| rid == &id && f["volts"] == "12.5"));

        // Not acked yet, so still pending for this consumer
        let pending = client
            .xreadgroup(stream, group, "c1", "0", 10, None)
            .await
            .unwrap();
        assert!(pending.iter().any(|(rid, _)| rid == &id));

        let acked = client.xack(stream, group, &[id]).await.unwrap();
        assert_eq!(acked, 1);
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_list_push_pop() {
        let client = RedisClient::new("redis://localhost:6379").await.unwrap();
        client.rpush("common_test_list", "job").await.unwrap();
        let popped = client.blpop(&["common_test_list"], 1).await.unwrap();
        assert_eq!(popped, Some(("common_test_list".to_string(), "job".to_string())));
    }
}
