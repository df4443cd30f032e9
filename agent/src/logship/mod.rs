//! Application log shipping
//!
//! Captured output is fanned out to every configured sink: the trainer
//! always, ELK endpoints when configured.

pub mod elk;
pub mod trainer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};
use trainer_api::models::AppLogs;

use crate::errors::AgentError;

/// Destination for captured application output
#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, logs: &HashMap<String, AppLogs>) -> Result<(), AgentError>;
}

/// Delivers the same payload to every sink concurrently. A failing or slow
/// sink never holds up or fails the others.
pub struct LogFanout {
    sinks: Vec<Arc<dyn LogSink>>,
    timeout: Duration,
}

impl LogFanout {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>, timeout: Duration) -> Self {
        Self { sinks, timeout }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Number of sinks that accepted the payload
    pub async fn send(&self, logs: &HashMap<String, AppLogs>) -> usize {
        let results = join_all(self.sinks.iter().map(|sink| async move {
            let result = tokio::time::timeout(self.timeout, sink.send(logs)).await;
            (sink.name(), result)
        }))
        .await;

        let mut delivered = 0;
        for (name, result) in results {
            match result {
                Ok(Ok(())) => {
                    debug!("Shipped logs to {}", name);
                    delivered += 1;
                }
                Ok(Err(e)) => warn!("Log sink {} failed: {}", name, e),
                Err(_) => warn!("Log sink {} timed out after {:?}", name, self.timeout),
            }
        }
        delivered
    }
}
