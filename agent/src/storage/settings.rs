//! Settings file management

use std::collections::HashMap;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write rolling log files into this directory
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Identifier this host checks in with
    #[serde(default = "default_host_id")]
    pub host_id: String,

    /// Base directory for agent state
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Trainer configuration
    #[serde(default)]
    pub trainer: TrainerSettings,

    /// Checkin interval in seconds
    #[serde(default = "default_checkin_interval")]
    pub checkin_interval_secs: u64,

    /// Log shipping interval in seconds
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: u64,

    /// Consecutive non-empty change batches handled within one checkin
    #[serde(default = "default_max_checkin_rounds")]
    pub max_checkin_rounds: u32,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Container engine configuration
    #[serde(default)]
    pub engine: EngineSettings,

    /// Local status server configuration
    #[serde(default)]
    pub status_server: StatusServerSettings,

    /// Additional ELK log sinks
    #[serde(default)]
    pub elk_sinks: Vec<ElkSinkSettings>,
}

fn default_true() -> bool {
    true
}

fn default_host_id() -> String {
    "host1".to_string()
}

fn default_storage_dir() -> String {
    "/var/lib/hostd".to_string()
}

fn default_checkin_interval() -> u64 {
    60
}

fn default_log_interval() -> u64 {
    10
}

fn default_max_checkin_rounds() -> u32 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            host_id: default_host_id(),
            storage_dir: default_storage_dir(),
            trainer: TrainerSettings::default(),
            checkin_interval_secs: default_checkin_interval(),
            log_interval_secs: default_log_interval(),
            max_checkin_rounds: default_max_checkin_rounds(),
            health: HealthSettings::default(),
            engine: EngineSettings::default(),
            status_server: StatusServerSettings::default(),
            elk_sinks: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        if !file.exists().await {
            warn!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }

        file.read_json::<Settings>().await.map_err(|e| {
            AgentError::ConfigError(format!(
                "unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Apply `--hostid`, `--interval` and `--traineruri`
    pub fn apply_cli_overrides(&mut self, cli_args: &HashMap<String, String>) -> Result<(), AgentError> {
        if let Some(host_id) = cli_args.get("hostid") {
            self.host_id = host_id.clone();
        }
        if let Some(interval) = cli_args.get("interval") {
            self.checkin_interval_secs = interval
                .parse()
                .map_err(|_| AgentError::ConfigError(format!("invalid interval: {}", interval)))?;
        }
        if let Some(uri) = cli_args.get("traineruri") {
            self.trainer.base_url = uri.clone();
        }
        if self.checkin_interval_secs == 0 {
            return Err(AgentError::ConfigError(
                "checkin interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trainer settings
#[derive(Debug, Clone, Deserialize)]
pub struct TrainerSettings {
    /// Base URL of the trainer
    #[serde(default = "default_trainer_url")]
    pub base_url: String,
}

fn default_trainer_url() -> String {
    "http://localhost:5001".to_string()
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            base_url: default_trainer_url(),
        }
    }
}

/// Deploy-time health check settings
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    /// Evaluations before a deploy is declared unhealthy
    #[serde(default = "default_check_attempts")]
    pub attempts: u32,

    /// Seconds between evaluations
    #[serde(default = "default_check_interval")]
    pub interval_secs: u64,

    /// Upper bound on a single probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_check_attempts() -> u32 {
    10
}

fn default_check_interval() -> u64 {
    6
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            attempts: default_check_attempts(),
            interval_secs: default_check_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Container engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    /// Upper bound on a two-sample metrics read
    #[serde(default = "default_stats_timeout")]
    pub stats_timeout_secs: u64,

    /// Mount point of the instance scratch dir inside containers
    #[serde(default = "default_files_mount_path")]
    pub files_mount_path: String,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_stats_timeout() -> u64 {
    10
}

fn default_files_mount_path() -> String {
    "/files".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            docker_socket: default_docker_socket(),
            stats_timeout_secs: default_stats_timeout(),
            files_mount_path: default_files_mount_path(),
        }
    }
}

/// Local status server settings
#[derive(Debug, Clone, Deserialize)]
pub struct StatusServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_status_host")]
    pub host: String,

    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    7070
}

impl Default for StatusServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}

/// ELK sink settings
#[derive(Debug, Clone, Deserialize)]
pub struct ElkSinkSettings {
    /// Document endpoint, e.g. `https://elk:9200/logs/_doc`
    pub uri: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: Option<SecretString>,

    /// PEM CA certificate trusted for the endpoint
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub insecure_skip_verify: bool,
}
