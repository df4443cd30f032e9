//! Per-application runtime state and last applied configuration

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use futures::future::join_all;
use tracing::debug;
use trainer_api::models::{AppStatus, ApplicationState, Metric, VersionConfig};

use crate::engine::ContainerEngine;
use crate::errors::AgentError;
use crate::health::HealthChecker;

#[derive(Debug, Default)]
struct Inner {
    states: BTreeMap<String, ApplicationState>,
    configs: HashMap<String, VersionConfig>,
}

/// Application states keyed by name. At most one state exists per name.
#[derive(Debug, Default)]
pub struct AppStateStore {
    inner: RwLock<Inner>,
}

impl AppStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the state for `state.name`
    pub fn upsert(&self, state: ApplicationState) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.states.insert(state.name.clone(), state);
    }

    /// Forget an application along with its configuration
    pub fn remove(&self, name: &str) -> Option<ApplicationState> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.configs.remove(name);
        inner.states.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<ApplicationState, AgentError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .states
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("application {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.states.contains_key(name)
    }

    /// Snapshot of every state, ordered by name
    pub fn list_all(&self) -> Vec<ApplicationState> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.states.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the status of `name` if it is still backed by `instance_id`
    pub fn set_status(&self, name: &str, instance_id: &str, status: AppStatus) -> bool {
        self.update(name, instance_id, |state| state.application.state = status)
    }

    /// Set the last known metrics of `name` if it is still backed by `instance_id`
    pub fn set_metrics(&self, name: &str, instance_id: &str, metrics: Metric) -> bool {
        self.update(name, instance_id, |state| state.application.metrics = metrics)
    }

    fn update<F>(&self, name: &str, instance_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut ApplicationState),
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.states.get_mut(name) {
            Some(state) if state.instance_id == instance_id => {
                apply(state);
                true
            }
            Some(_) => {
                debug!("{} was redeployed, dropping update for {}", name, instance_id);
                false
            }
            None => false,
        }
    }

    pub fn set_config(&self, name: &str, config: VersionConfig) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.configs.insert(name.to_string(), config);
    }

    pub fn config(&self, name: &str) -> Option<VersionConfig> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.configs.get(name).cloned()
    }

    /// Re-evaluate every application: `failed` when its instance is no longer
    /// live, otherwise `running` or `checks_failed` from a single health check
    /// of its stored configuration.
    ///
    /// Probes run without holding the lock. A state replaced in the meantime
    /// keeps whatever status its new instance was given.
    pub async fn refresh_all(
        &self,
        engine: &dyn ContainerEngine,
        checker: &dyn HealthChecker,
    ) -> Vec<ApplicationState> {
        let targets: Vec<(String, String, VersionConfig)> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner
                .states
                .values()
                .map(|state| {
                    let config = inner.configs.get(&state.name).cloned().unwrap_or_default();
                    (state.name.clone(), state.instance_id.clone(), config)
                })
                .collect()
        };

        let verdicts = join_all(targets.into_iter().map(|(name, instance_id, config)| async move {
            let status = if !engine.query_liveness(&instance_id).await {
                AppStatus::Failed
            } else if checker.evaluate(&config).await {
                AppStatus::Running
            } else {
                AppStatus::ChecksFailed
            };
            (name, instance_id, status)
        }))
        .await;

        for (name, instance_id, status) in verdicts {
            self.set_status(&name, &instance_id, status);
        }
        self.list_all()
    }
}
