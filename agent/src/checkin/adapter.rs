//! Checkin cycle

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use trainer_api::models::{Change, HostCheckinDataPackage, Metric};

use crate::checkin::TrainerChannel;
use crate::errors::AgentError;
use crate::reconcile::reconciler::Reconciler;
use crate::telemetry::HostSampler;

type HostMetricsFn = Box<dyn Fn() -> Metric + Send + Sync>;

/// Result of one checkin cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckinOutcome {
    /// Snapshots submitted to the trainer
    pub rounds: u32,
    /// Changes newly applied over all rounds
    pub applied: usize,
    /// The trainer was still sending changes when the round cap was hit
    pub capped: bool,
}

pub struct CheckinAdapter {
    host_id: String,
    channel: Arc<dyn TrainerChannel>,
    reconciler: Arc<Reconciler>,
    max_rounds: u32,
    host_metrics: HostMetricsFn,
    last_checkin: RwLock<Option<DateTime<Utc>>>,
}

impl CheckinAdapter {
    pub fn new(
        host_id: String,
        channel: Arc<dyn TrainerChannel>,
        reconciler: Arc<Reconciler>,
        max_rounds: u32,
    ) -> Self {
        let sampler = HostSampler::new();
        Self {
            host_id,
            channel,
            reconciler,
            max_rounds: max_rounds.max(1),
            host_metrics: Box::new(move || sampler.sample()),
            last_checkin: RwLock::new(None),
        }
    }

    /// Replace the host metrics source
    pub fn with_host_metrics<F>(mut self, host_metrics: F) -> Self
    where
        F: Fn() -> Metric + Send + Sync + 'static,
    {
        self.host_metrics = Box::new(host_metrics);
        self
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Time of the last checkin the trainer accepted
    pub fn last_checkin(&self) -> Option<DateTime<Utc>> {
        *self.last_checkin.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Refresh every application, sample metrics and assemble the snapshot
    pub async fn build_snapshot(&self) -> HostCheckinDataPackage {
        self.reconciler.refresh().await;
        self.reconciler.collect_metrics().await;

        HostCheckinDataPackage {
            state: self.reconciler.store().list_all(),
            changes_applied: self.reconciler.changes().snapshot(),
            host_metrics: (self.host_metrics)(),
        }
    }

    /// Check in, then keep checking in for as long as the trainer hands out
    /// changes that get applied, up to the round cap
    pub async fn run_cycle(&self) -> Result<CheckinOutcome, AgentError> {
        let mut outcome = CheckinOutcome::default();

        loop {
            let snapshot = self.build_snapshot().await;
            let raw = self.channel.checkin(&self.host_id, &snapshot).await?;
            outcome.rounds += 1;
            *self.last_checkin.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());

            let changes = decode_changes(raw);
            if changes.is_empty() {
                break;
            }

            info!("Received {} change(s)", changes.len());
            let report = self.reconciler.apply_changes(&changes).await;
            debug!(
                "Applied {:?}, skipped {:?}, pending {:?}",
                report.applied, report.skipped, report.pending
            );
            outcome.applied += report.applied.len();

            if !report.made_progress() {
                break;
            }
            if outcome.rounds >= self.max_rounds {
                warn!(
                    "Trainer still sending changes after {} rounds, deferring to next checkin",
                    outcome.rounds
                );
                outcome.capped = true;
                break;
            }
        }
        Ok(outcome)
    }
}

/// Decode each change on its own so one malformed entry does not drop the batch
pub fn decode_changes(raw: Vec<serde_json::Value>) -> Vec<Change> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Change>(value) {
            Ok(change) => Some(change),
            Err(e) => {
                warn!("Ignoring undecodable change: {}", e);
                None
            }
        })
        .collect()
}
