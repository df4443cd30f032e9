//! Container engine abstraction
//!
//! Everything the reconciler needs from a container runtime, keyed by the
//! opaque instance id assigned at deploy time. [`docker::DockerEngine`] is the
//! production implementation; tests substitute in-memory doubles.

pub mod docker;
pub mod stats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trainer_api::models::{AppLogs, Metric, VersionConfig};

use crate::errors::AgentError;

/// Container engine capability
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pull or otherwise prepare the image for `config`
    async fn install(&self, name: &str, config: &VersionConfig) -> Result<(), AgentError>;

    /// Materialize inline files, then create and start the instance.
    ///
    /// Fails when an instance with the same id already exists.
    async fn run(
        &self,
        instance_id: &str,
        name: &str,
        config: &VersionConfig,
    ) -> Result<(), AgentError>;

    /// Stop, then remove the instance. Both steps are always attempted; the
    /// result is `Ok` only if both succeeded.
    async fn stop(&self, instance_id: &str) -> Result<(), AgentError>;

    /// Whether the instance is currently running. Unknown instances are not
    /// live.
    async fn query_liveness(&self, instance_id: &str) -> bool;

    /// Correlate the next two resource samples of the instance
    async fn stream_metrics(&self, instance_id: &str) -> Result<Metric, AgentError>;

    /// Output written by the instance between `since` and `until`
    async fn logs(
        &self,
        instance_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AppLogs, AgentError>;
}
