//! Trainer log sink

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use trainer_api::models::AppLogs;

use crate::checkin::TrainerChannel;
use crate::errors::AgentError;
use crate::logship::LogSink;

/// Posts the whole payload to the trainer in one request
pub struct TrainerLogSink {
    host_id: String,
    channel: Arc<dyn TrainerChannel>,
}

impl TrainerLogSink {
    pub fn new(host_id: String, channel: Arc<dyn TrainerChannel>) -> Self {
        Self { host_id, channel }
    }
}

#[async_trait]
impl LogSink for TrainerLogSink {
    fn name(&self) -> &str {
        "trainer"
    }

    async fn send(&self, logs: &HashMap<String, AppLogs>) -> Result<(), AgentError> {
        self.channel.push_logs(&self.host_id, logs).await
    }
}
