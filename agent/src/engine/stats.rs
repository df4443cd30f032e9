//! Resource sampling sessions
//!
//! One background streaming session per instance id. Sessions are opened on
//! the first metrics read and reused afterwards, so repeated polls do not leak
//! sampling streams.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyperlocal::UnixConnector;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trainer_api::models::Metric;

use crate::correlator::{correlate, ResourceSample};
use crate::errors::AgentError;

/// Samples buffered per session; older ones are dropped while nobody reads
const SAMPLE_BUFFER: usize = 4;

/// Source of raw resource samples for one instance
#[async_trait]
pub trait SampleFeed: Send + Sync + 'static {
    /// Push samples into `tx` until the instance goes away or `tx` is closed
    async fn feed(
        &self,
        instance_id: String,
        tx: mpsc::Sender<ResourceSample>,
    ) -> Result<(), AgentError>;
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<ResourceSample>>>;

struct Session {
    samples: SharedReceiver,
    task: JoinHandle<()>,
}

/// Sampling sessions keyed by instance id
pub struct SampleSessions<F: SampleFeed> {
    feed: Arc<F>,
    sessions: Mutex<HashMap<String, Session>>,
    read_timeout: Duration,
}

impl<F: SampleFeed> SampleSessions<F> {
    pub fn new(feed: F, read_timeout: Duration) -> Self {
        Self {
            feed: Arc::new(feed),
            sessions: Mutex::new(HashMap::new()),
            read_timeout,
        }
    }

    /// Wait for two fresh samples and correlate them
    pub async fn read_metric(&self, instance_id: &str) -> Result<Metric, AgentError> {
        let (samples, reused) = self.session(instance_id);
        let mut rx = samples.lock().await;

        if reused {
            // Whatever is buffered predates this read
            while rx.try_recv().is_ok() {}
        }

        let pair = tokio::time::timeout(self.read_timeout, async {
            let first = rx.recv().await?;
            let second = rx.recv().await?;
            Some((first, second))
        })
        .await;

        match pair {
            Ok(Some((s0, s1))) => correlate(Some(&s0), Some(&s1)),
            Ok(None) => {
                drop(rx);
                self.discard(instance_id, &samples);
                Err(AgentError::NoSamples(format!(
                    "sample stream for {} ended",
                    instance_id
                )))
            }
            Err(_) => {
                drop(rx);
                self.discard(instance_id, &samples);
                Err(AgentError::NoSamples(format!(
                    "no samples for {} within {:?}",
                    instance_id, self.read_timeout
                )))
            }
        }
    }

    /// End the session of an instance, if any
    pub fn close(&self, instance_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.remove(instance_id) {
            session.task.abort();
        }
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn session(&self, instance_id: &str) -> (SharedReceiver, bool) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(instance_id) {
            return (session.samples.clone(), true);
        }

        debug!("Opening sample session for {}", instance_id);
        let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);
        let feed = self.feed.clone();
        let id = instance_id.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = feed.feed(id.clone(), tx).await {
                debug!("Sample feed for {} ended: {}", id, e);
            }
        });

        let samples = Arc::new(tokio::sync::Mutex::new(rx));
        sessions.insert(
            instance_id.to_string(),
            Session {
                samples: samples.clone(),
                task,
            },
        );
        (samples, false)
    }

    /// Remove the session only if it is still the one that failed
    fn discard(&self, instance_id: &str, samples: &SharedReceiver) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let same = sessions
            .get(instance_id)
            .is_some_and(|s| Arc::ptr_eq(&s.samples, samples));
        if same {
            if let Some(session) = sessions.remove(instance_id) {
                session.task.abort();
            }
        }
    }
}

impl<F: SampleFeed> Drop for SampleSessions<F> {
    fn drop(&mut self) {
        let sessions = self.sessions.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, session) in sessions.drain() {
            session.task.abort();
        }
    }
}

// ================================ DOCKER FEED ===================================== //

type HyperClient = Client<UnixConnector, Full<Bytes>>;

/// Streams `/containers/{id}/stats` from the Docker Engine API
pub struct DockerStatsFeed {
    client: HyperClient,
    socket_path: PathBuf,
}

impl DockerStatsFeed {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let client =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(UnixConnector);
        Self {
            client,
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl SampleFeed for DockerStatsFeed {
    async fn feed(
        &self,
        instance_id: String,
        tx: mpsc::Sender<ResourceSample>,
    ) -> Result<(), AgentError> {
        let path = format!("/containers/{}/stats?stream=true", instance_id);
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket_path, &path).into();

        let req = hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| AgentError::EngineFailure(format!("stats request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AgentError::EngineFailure(format!(
                "stats for {} returned {}",
                instance_id,
                res.status()
            )));
        }

        let mut body = res.into_body();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(frame) = body.frame().await {
            let frame = frame
                .map_err(|e| AgentError::EngineFailure(format!("stats stream broke: {}", e)))?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            buf.extend_from_slice(&data);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if line.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                let stats = match serde_json::from_slice::<DockerStats>(&line) {
                    Ok(stats) => stats,
                    Err(e) => {
                        warn!("Unreadable stats frame for {}: {}", instance_id, e);
                        continue;
                    }
                };
                match tx.try_send(stats.into()) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => return Ok(()),
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DockerStats {
    cpu_stats: CpuStats,
    memory_stats: MemoryStats,
    networks: HashMap<String, NetworkStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuStats {
    cpu_usage: CpuUsage,
    system_cpu_usage: u64,
    online_cpus: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuUsage {
    total_usage: u64,
    percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoryStats {
    usage: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkStats {
    rx_bytes: u64,
}

impl From<DockerStats> for ResourceSample {
    fn from(stats: DockerStats) -> Self {
        // cgroup v2 hosts omit percpu_usage and report online_cpus instead
        let num_cores = match stats.cpu_stats.online_cpus {
            0 => stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|p| p.len() as u32)
                .unwrap_or(1),
            n => n,
        };

        ResourceSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu_total: stats.cpu_stats.system_cpu_usage,
            num_cores,
            memory: stats.memory_stats.usage,
            net_rx: stats.networks.values().map(|n| n.rx_bytes).sum(),
        }
    }
}
