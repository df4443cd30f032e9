//! Trainer endpoints

use std::collections::HashMap;

use async_trait::async_trait;
use trainer_api::models::{AppLogs, HostCheckinDataPackage};

use crate::checkin::TrainerChannel;
use crate::errors::AgentError;
use crate::http::client::HttpClient;

fn channel_failure(endpoint: &str, err: AgentError) -> AgentError {
    match err {
        AgentError::ChannelFailure(_) => err,
        other => AgentError::ChannelFailure(format!("{}: {}", endpoint, other)),
    }
}

#[async_trait]
impl TrainerChannel for HttpClient {
    async fn checkin(
        &self,
        host_id: &str,
        snapshot: &HostCheckinDataPackage,
    ) -> Result<Vec<serde_json::Value>, AgentError> {
        let changes: Option<Vec<serde_json::Value>> = self
            .post("/checkin", &[("host", host_id)], snapshot)
            .await
            .map_err(|e| channel_failure("checkin", e))?;
        Ok(changes.unwrap_or_default())
    }

    async fn push_logs(
        &self,
        host_id: &str,
        logs: &HashMap<String, AppLogs>,
    ) -> Result<(), AgentError> {
        self.post_no_content("/log/apps", &[("host", host_id)], logs)
            .await
            .map_err(|e| channel_failure("log/apps", e))
    }
}
