//! Network reachability probe
//!
//! Measures round-trip latency to a target with concurrent TCP connects
//! (no raw sockets needed). Stream fields: `avg_rtt`, `min_rtt`, `max_rtt`
//! in milliseconds and `packet_loss_percent`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use fleet_model::{round2, NULL_VALUE, STREAM_NETWORK};
use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use super::Collector;

/// Probes per measurement
pub const DEFAULT_PROBE_COUNT: usize = 5;

/// TCP connect latency probe
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    target: String,
    count: usize,
    timeout: Duration,
}

impl NetworkProbe {
    /// `target` is `host:port`
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            count: DEFAULT_PROBE_COUNT,
            timeout,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// One connect attempt; `None` on refusal or timeout
    async fn probe(&self) -> Option<f64> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => Some(started.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.target, e);
                None
            },
            Err(_) => {
                debug!("Probe to {} timed out", self.target);
                None
            },
        }
    }
}

/// Summarize probe results into stream fields
///
/// RTT fields carry the null sentinel when every probe was lost.
pub fn summarize(results: &[Option<f64>]) -> BTreeMap<String, f64> {
    let replies: Vec<f64> = results.iter().flatten().copied().collect();
    let lost = results.len() - replies.len();
    let loss = if results.is_empty() {
        100.0
    } else {
        lost as f64 / results.len() as f64 * 100.0
    };

    let (avg, min, max) = if replies.is_empty() {
        (NULL_VALUE, NULL_VALUE, NULL_VALUE)
    } else {
        let sum: f64 = replies.iter().sum();
        let min = replies.iter().copied().fold(f64::INFINITY, f64::min);
        let max = replies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (
            round2(sum / replies.len() as f64),
            round2(min),
            round2(max),
        )
    };

    BTreeMap::from([
        ("avg_rtt".to_string(), avg),
        ("min_rtt".to_string(), min),
        ("max_rtt".to_string(), max),
        ("packet_loss_percent".to_string(), round2(loss)),
    ])
}

#[async_trait]
impl Collector for NetworkProbe {
    fn stream(&self) -> &str {
        STREAM_NETWORK
    }

    async fn collect(&mut self) -> anyhow::Result<BTreeMap<String, f64>> {
        let probe = &*self;
        let results = join_all((0..probe.count).map(|_| probe.probe())).await;
        Ok(summarize(&results))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_summarize_mixed() {
        let fields = summarize(&[Some(10.0), None, Some(20.0), Some(30.0), None]);
        assert_eq!(fields["avg_rtt"], 20.0);
        assert_eq!(fields["min_rtt"], 10.0);
        assert_eq!(fields["max_rtt"], 30.0);
        assert_eq!(fields["packet_loss_percent"], 40.0);
    }

    #[test]
    fn test_summarize_all_lost() {
        let fields = summarize(&[None; 5]);
        assert_eq!(fields["avg_rtt"], NULL_VALUE);
        assert_eq!(fields["min_rtt"], NULL_VALUE);
        assert_eq!(fields["max_rtt"], NULL_VALUE);
        assert_eq!(fields["packet_loss_percent"], 100.0);
    }

    #[tokio::test]
    async fn test_probe_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {}
        });

        let mut probe = NetworkProbe::new(addr.to_string(), Duration::from_secs(2));
        let fields = probe.collect().await.unwrap();

        assert_eq!(fields["packet_loss_percent"], 0.0);
        assert!(fields["avg_rtt"] >= 0.0);
        assert!(fields["min_rtt"] <= fields["max_rtt"]);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let mut probe = NetworkProbe::new(addr.to_string(), Duration::from_secs(2)).with_count(3);
        let fields = probe.collect().await.unwrap();

        assert_eq!(fields["packet_loss_percent"], 100.0);
        assert_eq!(fields["avg_rtt"], NULL_VALUE);
    }
}
