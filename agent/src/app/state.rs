//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::checkin::adapter::CheckinAdapter;
use crate::checkin::TrainerChannel;
use crate::engine::docker::DockerEngine;
use crate::engine::ContainerEngine;
use crate::errors::AgentError;
use crate::health::{HealthChecker, ProbeHealthChecker};
use crate::http::client::HttpClient;
use crate::logship::elk::ElkLogSink;
use crate::logship::trainer::TrainerLogSink;
use crate::logship::{LogFanout, LogSink};
use crate::reconcile::changelog::ChangeLog;
use crate::reconcile::reconciler::Reconciler;
use crate::reconcile::retry::ShutdownRx;
use crate::reconcile::store::AppStateStore;

/// Main application state
pub struct AppState {
    /// Application states
    pub store: Arc<AppStateStore>,

    /// Applied change ids
    pub changes: Arc<ChangeLog>,

    /// Change application
    pub reconciler: Arc<Reconciler>,

    /// Checkin cycle
    pub adapter: Arc<CheckinAdapter>,

    /// Log sinks
    pub fanout: Arc<LogFanout>,
}

impl AppState {
    /// Initialize application state against the local docker daemon and the
    /// configured trainer
    pub async fn init(options: &AppOptions, shutdown: ShutdownRx) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        options.storage.setup().await?;

        let engine = DockerEngine::new(options.engine.clone());
        let server_version = engine.ping().await?;
        info!("Connected to docker {}", server_version);

        let checker = ProbeHealthChecker::new(options.health.probe_timeout)?;
        let channel = HttpClient::new(&options.trainer_base_url)?;

        let mut extra_sinks: Vec<Arc<dyn LogSink>> = Vec::new();
        for elk in &options.elk_sinks {
            match ElkLogSink::from_settings(elk).await {
                Ok(sink) => extra_sinks.push(Arc::new(sink)),
                Err(e) => warn!("Skipping ELK sink {}: {}", elk.uri, e),
            }
        }

        Ok(Self::new(
            options,
            Arc::new(engine),
            Arc::new(checker),
            Arc::new(channel),
            extra_sinks,
            shutdown,
        ))
    }

    /// Wire the state around the given collaborators
    pub fn new(
        options: &AppOptions,
        engine: Arc<dyn ContainerEngine>,
        checker: Arc<dyn HealthChecker>,
        channel: Arc<dyn TrainerChannel>,
        extra_sinks: Vec<Arc<dyn LogSink>>,
        shutdown: ShutdownRx,
    ) -> Self {
        let store = Arc::new(AppStateStore::new());
        let changes = Arc::new(ChangeLog::new());

        let reconciler = Arc::new(Reconciler::new(
            engine,
            checker,
            store.clone(),
            changes.clone(),
            options.health.retry,
            shutdown,
        ));

        let adapter = Arc::new(CheckinAdapter::new(
            options.host_id.clone(),
            channel.clone(),
            reconciler.clone(),
            options.max_checkin_rounds,
        ));

        let mut sinks: Vec<Arc<dyn LogSink>> =
            vec![Arc::new(TrainerLogSink::new(options.host_id.clone(), channel))];
        sinks.extend(extra_sinks);
        let fanout = Arc::new(LogFanout::new(sinks, options.log_sink_timeout));

        Self {
            store,
            changes,
            reconciler,
            adapter,
            fanout,
        }
    }
}
