//! Change application
//!
//! Turns trainer change batches into engine calls and keeps the
//! [`AppStateStore`] and [`ChangeLog`] in step with what actually happened.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use trainer_api::models::{
    AppLogs, AppStatus, Application, ApplicationState, Change, Instruction, VersionConfig,
};

use crate::engine::ContainerEngine;
use crate::health::HealthChecker;
use crate::reconcile::changelog::ChangeLog;
use crate::reconcile::retry::{FixedRetry, RetryOutcome, ShutdownRx};
use crate::reconcile::store::AppStateStore;
use crate::utils::generate_instance_id;

/// What happened to each change of a batch, in batch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    /// Already in the change log
    pub skipped: Vec<String>,
    /// Attempted without reaching `running`; offered again next checkin
    pub pending: Vec<String>,
}

impl ApplyReport {
    pub fn made_progress(&self) -> bool {
        !self.applied.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Skipped,
    Pending,
}

pub struct Reconciler {
    engine: Arc<dyn ContainerEngine>,
    checker: Arc<dyn HealthChecker>,
    store: Arc<AppStateStore>,
    changes: Arc<ChangeLog>,
    health_retry: FixedRetry,
    shutdown: ShutdownRx,
    // serializes batches and refreshes
    writer: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        checker: Arc<dyn HealthChecker>,
        store: Arc<AppStateStore>,
        changes: Arc<ChangeLog>,
        health_retry: FixedRetry,
        shutdown: ShutdownRx,
    ) -> Self {
        Self {
            engine,
            checker,
            store,
            changes,
            health_retry,
            shutdown,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<AppStateStore> {
        &self.store
    }

    pub fn changes(&self) -> &Arc<ChangeLog> {
        &self.changes
    }

    /// Apply a batch of changes.
    ///
    /// Changes for the same application run one after another in batch order;
    /// different applications are handled concurrently. Only changes whose
    /// application ends up `running` (or is gone, for removals) are recorded
    /// as applied.
    pub async fn apply_changes(&self, batch: &[Change]) -> ApplyReport {
        let _writer = self.writer.lock().await;

        // First occurrence of an id wins, whatever application it names
        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates: Vec<(usize, &Change, Outcome)> = Vec::new();
        let mut groups: Vec<(&str, Vec<(usize, &Change)>)> = Vec::new();
        for (index, change) in batch.iter().enumerate() {
            if !seen.insert(change.id.as_str()) {
                debug!("Change {} repeated in batch, skipping", change.id);
                duplicates.push((index, change, Outcome::Skipped));
                continue;
            }
            match groups.iter_mut().find(|(name, _)| *name == change.name) {
                Some((_, group)) => group.push((index, change)),
                None => groups.push((change.name.as_str(), vec![(index, change)])),
            }
        }

        let mut outcomes: Vec<(usize, &Change, Outcome)> =
            join_all(groups.into_iter().map(|(_, group)| self.apply_group(group)))
                .await
                .into_iter()
                .flatten()
                .chain(duplicates)
                .collect();
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut report = ApplyReport::default();
        for (_, change, outcome) in outcomes {
            let bucket = match outcome {
                Outcome::Applied => &mut report.applied,
                Outcome::Skipped => &mut report.skipped,
                Outcome::Pending => &mut report.pending,
            };
            bucket.push(change.id.clone());
        }
        report
    }

    async fn apply_group<'a>(
        &self,
        group: Vec<(usize, &'a Change)>,
    ) -> Vec<(usize, &'a Change, Outcome)> {
        let mut outcomes = Vec::with_capacity(group.len());
        for (index, change) in group {
            if self.changes.is_applied(&change.id) {
                debug!("Change {} already applied, skipping", change.id);
                outcomes.push((index, change, Outcome::Skipped));
                continue;
            }

            let succeeded = match change.instruction() {
                Instruction::AddApplication(config) => {
                    self.replace(&change.name, config, &change.id).await
                }
                Instruction::RemoveApplication => self.teardown(&change.name).await,
            };

            if succeeded {
                self.changes.mark_applied(&change.id);
                outcomes.push((index, change, Outcome::Applied));
            } else {
                outcomes.push((index, change, Outcome::Pending));
            }
        }
        outcomes
    }

    /// Deploy outside of any change, returning whether the app became `running`.
    /// A tracked instance of the same name is torn down first.
    pub async fn deploy_app(&self, name: &str, config: &VersionConfig) -> bool {
        let _writer = self.writer.lock().await;
        self.replace(name, config, "").await
    }

    async fn replace(&self, name: &str, config: &VersionConfig, change_id: &str) -> bool {
        if self.store.contains(name) {
            info!("Replacing running instance of {}", name);
            self.teardown(name).await;
        }
        self.deploy(name, config, change_id).await
    }

    async fn deploy(&self, name: &str, config: &VersionConfig, change_id: &str) -> bool {
        info!("Installing {} version {}", name, config.version);
        if let Err(e) = self.engine.install(name, config).await {
            warn!("Install of {} failed, trying to run anyway: {}", name, e);
        }

        let instance_id = generate_instance_id(name);
        self.store.upsert(ApplicationState {
            instance_id: instance_id.clone(),
            name: name.to_string(),
            application: Application {
                name: name.to_string(),
                state: AppStatus::Pending,
                version: config.version.clone(),
                change_id: change_id.to_string(),
                metrics: Default::default(),
            },
        });
        self.store.set_config(name, config.clone());

        if let Err(e) = self.engine.run(&instance_id, name, config).await {
            error!("Failed to start {} as {}: {}", name, instance_id, e);
            self.store
                .set_status(name, &instance_id, AppStatus::InstallationFailed);
            return false;
        }

        let checker = &self.checker;
        let mut shutdown = self.shutdown.clone();
        let outcome = self
            .health_retry
            .run(&mut shutdown, |attempt| async move {
                debug!("Health check {} for {}", attempt, name);
                checker.evaluate(config).await
            })
            .await;

        let status = match outcome {
            RetryOutcome::Succeeded { attempt } => {
                info!("{} is running after {} health check(s)", name, attempt);
                AppStatus::Running
            }
            RetryOutcome::Exhausted => {
                warn!(
                    "{} failed {} health checks",
                    name, self.health_retry.attempts
                );
                AppStatus::ChecksFailed
            }
            RetryOutcome::Cancelled => {
                warn!("Health checks for {} interrupted by shutdown", name);
                AppStatus::ChecksFailed
            }
        };
        self.store.set_status(name, &instance_id, status);
        status == AppStatus::Running
    }

    /// Stop and forget an application. Unknown names are already deleted; an
    /// engine failure while stopping is logged and the state dropped anyway.
    pub async fn delete_app(&self, name: &str) -> bool {
        let _writer = self.writer.lock().await;
        self.teardown(name).await
    }

    async fn teardown(&self, name: &str) -> bool {
        let state = match self.store.get(name) {
            Ok(state) => state,
            Err(_) => {
                debug!("No application {} to delete", name);
                return true;
            }
        };

        info!("Deleting {} ({})", name, state.instance_id);
        if let Err(e) = self.engine.stop(&state.instance_id).await {
            warn!("Failed to stop {}: {}", state.instance_id, e);
        }
        self.store.remove(name);
        true
    }

    /// Re-evaluate liveness and health of every application
    pub async fn refresh(&self) -> Vec<ApplicationState> {
        let _writer = self.writer.lock().await;
        self.store
            .refresh_all(self.engine.as_ref(), self.checker.as_ref())
            .await
    }

    /// Sample every instance once. A failed read keeps the last known metrics.
    pub async fn collect_metrics(&self) {
        let states = self.store.list_all();
        let samples = join_all(states.iter().map(|state| async move {
            (state, self.engine.stream_metrics(&state.instance_id).await)
        }))
        .await;

        for (state, sample) in samples {
            match sample {
                Ok(metric) => {
                    self.store
                        .set_metrics(&state.name, &state.instance_id, metric);
                }
                Err(e) => debug!("No metrics for {}: {}", state.name, e),
            }
        }
    }

    /// Output of every application between `since` and `until`, keyed by name
    pub async fn collect_logs(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> HashMap<String, AppLogs> {
        let states = self.store.list_all();
        let captured = join_all(states.iter().map(|state| async move {
            (state, self.engine.logs(&state.instance_id, since, until).await)
        }))
        .await;

        captured
            .into_iter()
            .filter_map(|(state, logs)| match logs {
                Ok(logs) => Some((state.name.clone(), logs)),
                Err(e) => {
                    debug!("No logs for {}: {}", state.name, e);
                    None
                }
            })
            .collect()
    }
}
