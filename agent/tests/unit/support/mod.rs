//! In-memory doubles shared by the unit tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::watch;
use trainer_api::models::{
    AppCheck, AppLogs, HostCheckinDataPackage, Metric, VersionConfig,
};

use hostd::checkin::TrainerChannel;
use hostd::engine::ContainerEngine;
use hostd::errors::AgentError;
use hostd::health::HealthChecker;
use hostd::logship::LogSink;
use hostd::reconcile::changelog::ChangeLog;
use hostd::reconcile::reconciler::Reconciler;
use hostd::reconcile::retry::FixedRetry;
use hostd::reconcile::store::AppStateStore;

// ================================ ENGINE ======================================= //

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Install(String),
    Run(String, String),
    Stop(String),
    Liveness(String),
    Metrics(String),
    Logs(String),
}

#[derive(Default)]
pub struct EngineInner {
    calls: Vec<EngineCall>,
    live: HashSet<String>,
    names: HashMap<String, String>,
    log_windows: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Container engine that only keeps books
#[derive(Default)]
pub struct FakeEngine {
    pub inner: Mutex<EngineInner>,
    pub fail_install: bool,
    pub fail_run: bool,
    pub fail_stop: bool,
    pub metric: Option<Metric>,
    pub logs: HashMap<String, AppLogs>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Lifecycle calls only: install, run and stop
    pub fn lifecycle_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    EngineCall::Install(_) | EngineCall::Run(_, _) | EngineCall::Stop(_)
                )
            })
            .collect()
    }

    /// `(since, until)` of every logs call, in call order
    pub fn log_windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.inner.lock().unwrap().log_windows.clone()
    }

    pub fn is_live(&self, instance_id: &str) -> bool {
        self.inner.lock().unwrap().live.contains(instance_id)
    }

    /// Simulate an instance dying on its own
    pub fn kill(&self, instance_id: &str) {
        self.inner.lock().unwrap().live.remove(instance_id);
    }

    fn record(&self, call: EngineCall) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn install(&self, name: &str, _config: &VersionConfig) -> Result<(), AgentError> {
        self.record(EngineCall::Install(name.to_string()));
        if self.fail_install {
            return Err(AgentError::EngineFailure("pull failed".to_string()));
        }
        Ok(())
    }

    async fn run(
        &self,
        instance_id: &str,
        name: &str,
        _config: &VersionConfig,
    ) -> Result<(), AgentError> {
        self.record(EngineCall::Run(instance_id.to_string(), name.to_string()));
        if self.fail_run {
            return Err(AgentError::EngineFailure("create failed".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.live.insert(instance_id.to_string()) {
            return Err(AgentError::EngineFailure("name in use".to_string()));
        }
        inner.names.insert(instance_id.to_string(), name.to_string());
        Ok(())
    }

    async fn stop(&self, instance_id: &str) -> Result<(), AgentError> {
        self.record(EngineCall::Stop(instance_id.to_string()));
        self.inner.lock().unwrap().live.remove(instance_id);
        if self.fail_stop {
            return Err(AgentError::EngineFailure("remove failed".to_string()));
        }
        Ok(())
    }

    async fn query_liveness(&self, instance_id: &str) -> bool {
        self.record(EngineCall::Liveness(instance_id.to_string()));
        self.is_live(instance_id)
    }

    async fn stream_metrics(&self, instance_id: &str) -> Result<Metric, AgentError> {
        self.record(EngineCall::Metrics(instance_id.to_string()));
        self.metric
            .ok_or_else(|| AgentError::NoSamples(instance_id.to_string()))
    }

    async fn logs(
        &self,
        instance_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AppLogs, AgentError> {
        self.record(EngineCall::Logs(instance_id.to_string()));
        let name = {
            let mut inner = self.inner.lock().unwrap();
            inner.log_windows.push((since, until));
            inner.names.get(instance_id).cloned()
        };
        name.and_then(|name| self.logs.get(&name).cloned())
            .ok_or_else(|| AgentError::NotFound(instance_id.to_string()))
    }
}

// ================================ CHECKER ====================================== //

/// Fails the first `fail_first` evaluations of each config version, then passes
pub struct FakeChecker {
    fail_first: u32,
    calls: Mutex<HashMap<String, u32>>,
    total: AtomicUsize,
}

impl FakeChecker {
    pub fn healthy() -> Self {
        Self::flaky(0)
    }

    pub fn unhealthy() -> Self {
        Self::flaky(u32::MAX)
    }

    pub fn flaky(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthChecker for FakeChecker {
    async fn evaluate(&self, config: &VersionConfig) -> bool {
        self.total.fetch_add(1, Ordering::SeqCst);
        let mut calls = self.calls.lock().unwrap();
        let seen = calls.entry(config.version.clone()).or_insert(0);
        *seen += 1;
        *seen > self.fail_first
    }
}

// ================================ CHANNEL ====================================== //

/// Trainer that replays scripted change batches and keeps what it receives
#[derive(Default)]
pub struct FakeChannel {
    batches: Mutex<VecDeque<Vec<Value>>>,
    repeat_last: Option<Vec<Value>>,
    fresh_removals: bool,
    pub fail: bool,
    snapshots: Mutex<Vec<HostCheckinDataPackage>>,
    pushed: Mutex<Vec<(String, HashMap<String, AppLogs>)>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batches(batches: Vec<Vec<Value>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            ..Default::default()
        }
    }

    /// Answer every checkin with the same batch
    pub fn repeating(batch: Vec<Value>) -> Self {
        Self {
            repeat_last: Some(batch),
            ..Default::default()
        }
    }

    /// Answer every checkin with a removal carrying a never seen id
    pub fn endless() -> Self {
        Self {
            fresh_removals: true,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn snapshots(&self) -> Vec<HostCheckinDataPackage> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<(String, HashMap<String, AppLogs>)> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrainerChannel for FakeChannel {
    async fn checkin(
        &self,
        _host_id: &str,
        snapshot: &HostCheckinDataPackage,
    ) -> Result<Vec<Value>, AgentError> {
        if self.fail {
            return Err(AgentError::ChannelFailure("trainer down".to_string()));
        }
        let round = {
            let mut snapshots = self.snapshots.lock().unwrap();
            snapshots.push(snapshot.clone());
            snapshots.len()
        };

        if self.fresh_removals {
            return Ok(vec![remove_change(&format!("r{}", round), "ghost")]);
        }
        if let Some(batch) = &self.repeat_last {
            return Ok(batch.clone());
        }
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn push_logs(
        &self,
        host_id: &str,
        logs: &HashMap<String, AppLogs>,
    ) -> Result<(), AgentError> {
        if self.fail {
            return Err(AgentError::ChannelFailure("trainer down".to_string()));
        }
        self.pushed
            .lock()
            .unwrap()
            .push((host_id.to_string(), logs.clone()));
        Ok(())
    }
}

// ================================= SINKS ======================================= //

pub enum SinkMode {
    Accept,
    Fail,
    Hang,
}

pub struct FakeSink {
    name: String,
    mode: SinkMode,
    received: Mutex<Vec<HashMap<String, AppLogs>>>,
}

impl FakeSink {
    pub fn new(name: &str, mode: SinkMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<HashMap<String, AppLogs>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for FakeSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, logs: &HashMap<String, AppLogs>) -> Result<(), AgentError> {
        match self.mode {
            SinkMode::Accept => {
                self.received.lock().unwrap().push(logs.clone());
                Ok(())
            }
            SinkMode::Fail => Err(AgentError::ChannelFailure("sink down".to_string())),
            SinkMode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

// ================================ HELPERS ====================================== //

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub checker: Arc<FakeChecker>,
    pub reconciler: Arc<Reconciler>,
    pub shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Harness {
    pub fn new(engine: FakeEngine, checker: FakeChecker) -> Self {
        let engine = Arc::new(engine);
        let checker = Arc::new(checker);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = Arc::new(Reconciler::new(
            engine.clone(),
            checker.clone(),
            Arc::new(AppStateStore::new()),
            Arc::new(ChangeLog::new()),
            FixedRetry::default(),
            shutdown_rx,
        ));
        Self {
            engine,
            checker,
            reconciler,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn healthy() -> Self {
        Self::new(FakeEngine::new(), FakeChecker::healthy())
    }

    pub fn store(&self) -> &AppStateStore {
        self.reconciler.store()
    }

    pub fn changes(&self) -> &ChangeLog {
        self.reconciler.changes()
    }
}

pub fn version_config(version: &str) -> VersionConfig {
    VersionConfig {
        version: version.to_string(),
        checks: vec![AppCheck::http("http://127.0.0.1:8080/health")],
        ..Default::default()
    }
}

pub fn add_change(id: &str, name: &str, version: &str) -> Value {
    json!({
        "Id": id,
        "Type": "add_application",
        "Name": name,
        "Version": version,
        "AppConfig": {
            "DockerConfig": {"Repository": "registry.local/web", "Tag": version},
            "Checks": [{"Type": "http", "Goal": "http://127.0.0.1:8080/health"}],
            "Version": version
        }
    })
}

pub fn remove_change(id: &str, name: &str) -> Value {
    json!({"Id": id, "Type": "remove_application", "Name": name})
}

pub fn changes(raw: Vec<Value>) -> Vec<trainer_api::models::Change> {
    raw.into_iter()
        .map(|value| serde_json::from_value(value).unwrap())
        .collect()
}
