//! Command queue listener
//!
//! The cloud bridge pushes job documents onto a Redis `:TODO` list; they
//! are popped here with a bounded `BLPOP`. Jobs run concurrently, up to a
//! fixed limit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::RedisClient;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::executor::CommandExecutor;
use super::{parse_job, ParsedJob};

/// Default Redis list holding pending jobs
pub const COMMAND_QUEUE: &str = "relaysrv:commands:TODO";

/// Jobs executed at the same time
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 5;

/// Source of raw job documents
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Pop one job, waiting at most `timeout`; `None` when nothing arrived
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;
}

/// Redis list backed job queue
pub struct RedisJobQueue {
    client: RedisClient,
    key: String,
}

impl RedisJobQueue {
    pub fn new(client: RedisClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        // BLPOP timeouts are whole seconds; 0 would block forever
        let timeout_secs = timeout.as_secs().max(1) as usize;
        let popped = self.client.blpop(&[self.key.as_str()], timeout_secs).await?;
        Ok(popped.map(|(_, job)| job))
    }
}

/// In-memory job queue for tests and simulation
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<String>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: impl Into<String>) {
        self.jobs.lock().push_back(job.into());
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.jobs.lock().pop_front();
            if job.is_some() {
                return Ok(job);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Pops jobs and hands them to the executor
pub struct CommandListener {
    queue: Arc<dyn JobQueue>,
    executor: Arc<CommandExecutor>,
    poll_timeout: Duration,
    max_concurrent: usize,
}

impl CommandListener {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        executor: Arc<CommandExecutor>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            poll_timeout,
            max_concurrent: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Run until cancelled, then wait for jobs already started
    pub async fn run(self, token: CancellationToken) {
        info!(
            "Command listener started (max {} concurrent jobs)",
            self.max_concurrent
        );
        let slots = Arc::new(Semaphore::new(self.max_concurrent));
        let mut jobs = JoinSet::new();

        loop {
            let popped = tokio::select! {
                _ = token.cancelled() => break,
                popped = self.queue.pop(self.poll_timeout) => popped,
            };

            match popped {
                Ok(Some(raw)) => {
                    let permit = tokio::select! {
                        _ = token.cancelled() => break,
                        permit = slots.clone().acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else {
                        break;
                    };
                    self.dispatch(raw, permit, &mut jobs, &token);
                },
                Ok(None) => {},
                Err(e) => {
                    error!("Failed to pop command queue: {}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_timeout) => {},
                    }
                },
            }

            while let Some(Some(done)) = jobs.join_next().now_or_never() {
                if let Err(e) = done {
                    error!("Command task failed: {}", e);
                }
            }
        }

        while let Some(done) = jobs.join_next().await {
            if let Err(e) = done {
                error!("Command task failed: {}", e);
            }
        }
        info!("Command listener stopped");
    }

    fn dispatch(
        &self,
        raw: String,
        permit: tokio::sync::OwnedSemaphorePermit,
        jobs: &mut JoinSet<()>,
        token: &CancellationToken,
    ) {
        let executor = self.executor.clone();
        match parse_job(&raw) {
            Ok(ParsedJob::Valid { job_id, command }) => {
                debug!("Dispatching job {}", job_id);
                let token = token.child_token();
                jobs.spawn(async move {
                    let _permit = permit;
                    executor.execute(&job_id, command, &token).await;
                });
            },
            Ok(ParsedJob::Rejected { job_id, reason }) => {
                jobs.spawn(async move {
                    let _permit = permit;
                    executor.reject(&job_id, &reason).await;
                });
            },
            Err(e) => error!("Dropping job: {}", e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_queue_pop_and_timeout() {
        let queue = MemoryJobQueue::new();
        queue.push("a");

        assert_eq!(queue.pop(Duration::from_secs(1)).await.unwrap(), Some("a".to_string()));
        assert_eq!(queue.pop(Duration::from_secs(1)).await.unwrap(), None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_redis_queue_pop() {
        let client = RedisClient::new("redis://localhost:6379").await.unwrap();
        client.rpush("relaysrv_test_queue", "{}").await.unwrap();

        let queue = RedisJobQueue::new(client, "relaysrv_test_queue");
        assert_eq!(
            queue.pop(Duration::from_secs(1)).await.unwrap(),
            Some("{}".to_string())
        );
    }
}
