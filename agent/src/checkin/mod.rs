//! Checkin protocol
//!
//! The agent periodically reports its state to the trainer and receives the
//! changes it should apply in return.

pub mod adapter;

use std::collections::HashMap;

use async_trait::async_trait;
use trainer_api::models::{AppLogs, HostCheckinDataPackage};

use crate::errors::AgentError;

/// Transport to the trainer
#[async_trait]
pub trait TrainerChannel: Send + Sync {
    /// Submit a snapshot and receive the next change batch, undecoded
    async fn checkin(
        &self,
        host_id: &str,
        snapshot: &HostCheckinDataPackage,
    ) -> Result<Vec<serde_json::Value>, AgentError>;

    /// Upload captured application output
    async fn push_logs(
        &self,
        host_id: &str,
        logs: &HashMap<String, AppLogs>,
    ) -> Result<(), AgentError>;
}
