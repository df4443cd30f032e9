//! Application configuration options

use std::time::Duration;

use crate::engine::docker::DockerEngineOptions;
use crate::reconcile::retry::FixedRetry;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ElkSinkSettings, Settings};
use crate::workers::{checkin, log_shipper};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Identifier reported to the trainer
    pub host_id: String,

    /// Trainer base URL
    pub trainer_base_url: String,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Container engine configuration
    pub engine: DockerEngineOptions,

    /// Deploy-time health checking
    pub health: HealthOptions,

    /// Cap on consecutive change batches within one checkin
    pub max_checkin_rounds: u32,

    /// Enable local status server
    pub enable_status_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Checkin worker options
    pub checkin_worker: checkin::Options,

    /// Log shipper options
    pub log_shipper: log_shipper::Options,

    /// Upper bound on one delivery to one log sink
    pub log_sink_timeout: Duration,

    /// ELK sinks in addition to the trainer
    pub elk_sinks: Vec<ElkSinkSettings>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            host_id: "host1".to_string(),
            trainer_base_url: "http://localhost:5001".to_string(),
            storage: StorageLayout::default(),
            engine: DockerEngineOptions::default(),
            health: HealthOptions::default(),
            max_checkin_rounds: 10,
            enable_status_server: true,
            server: ServerOptions::default(),
            checkin_worker: checkin::Options::default(),
            log_shipper: log_shipper::Options::default(),
            log_sink_timeout: Duration::from_secs(30),
            elk_sinks: Vec::new(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host_id: settings.host_id.clone(),
            trainer_base_url: settings.trainer.base_url.clone(),
            storage: StorageLayout::new(&settings.storage_dir),
            engine: DockerEngineOptions::from_settings(settings),
            health: HealthOptions {
                retry: FixedRetry {
                    attempts: settings.health.attempts,
                    interval: Duration::from_secs(settings.health.interval_secs),
                },
                probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
            },
            max_checkin_rounds: settings.max_checkin_rounds,
            enable_status_server: settings.status_server.enabled,
            server: ServerOptions {
                host: settings.status_server.host.clone(),
                port: settings.status_server.port,
            },
            checkin_worker: checkin::Options {
                interval: Duration::from_secs(settings.checkin_interval_secs),
                ..Default::default()
            },
            log_shipper: log_shipper::Options {
                interval: Duration::from_secs(settings.log_interval_secs),
            },
            elk_sinks: settings.elk_sinks.clone(),
            ..Default::default()
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Health check options
#[derive(Debug, Clone)]
pub struct HealthOptions {
    /// Evaluations of a fresh deploy before giving up
    pub retry: FixedRetry,

    /// Upper bound on a single probe
    pub probe_timeout: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            retry: FixedRetry::default(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}
