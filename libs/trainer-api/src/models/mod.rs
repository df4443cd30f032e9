//! API models
//!
//! Everything the trainer sends or receives is encoded with PascalCase field
//! names.

use std::collections::HashMap;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of change requested by the trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    AddApplication,
    RemoveApplication,
}

/// A single desired-state instruction
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Change {
    /// Globally unique, used for deduplication
    pub id: String,

    #[serde(rename = "Type")]
    pub change_type: ChangeType,

    pub name: String,

    #[serde(default)]
    pub version: String,

    /// Empty for `remove_application`
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_config: VersionConfig,
}

/// Borrowed view of a change, one branch per change type
#[derive(Debug, Clone, Copy)]
pub enum Instruction<'a> {
    AddApplication(&'a VersionConfig),
    RemoveApplication,
}

impl Change {
    pub fn instruction(&self) -> Instruction<'_> {
        match self.change_type {
            ChangeType::AddApplication => Instruction::AddApplication(&self.app_config),
            ChangeType::RemoveApplication => Instruction::RemoveApplication,
        }
    }
}

/// Image reference and registry credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DockerConfig {
    pub repository: String,
    pub tag: String,
    pub reference: String,

    /// Registry host, e.g. `ghcr.io`
    pub server_address: String,
    pub username: String,
    pub password: Option<SecretString>,
}

impl DockerConfig {
    /// `repository:tag`, or the bare repository when no tag is set
    pub fn image(&self) -> String {
        if self.tag.is_empty() || self.repository.contains('@') {
            self.repository.clone()
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortMapping {
    pub host_port: String,
    pub container_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeMapping {
    pub host_path: String,
    pub container_path: String,
}

/// File materialized into the instance scratch dir before start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InlineFile {
    pub host_path: String,
    pub base64_file_contents: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EnvironmentVariable {
    pub key: String,
    pub value: String,
}

/// Readiness probe kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Http,
    Tcp,
}

/// Readiness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCheck {
    #[serde(rename = "Type")]
    pub kind: CheckKind,

    /// URL for http probes, `host:port` for tcp probes
    #[serde(rename = "Goal")]
    pub target: String,
}

impl AppCheck {
    pub fn http(target: impl Into<String>) -> Self {
        Self {
            kind: CheckKind::Http,
            target: target.into(),
        }
    }

    pub fn tcp(target: impl Into<String>) -> Self {
        Self {
            kind: CheckKind::Tcp,
            target: target.into(),
        }
    }
}

/// Immutable deployment descriptor
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VersionConfig {
    pub docker_config: DockerConfig,
    pub port_mappings: Vec<PortMapping>,
    pub volume_mappings: Vec<VolumeMapping>,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub files: Vec<InlineFile>,
    pub checks: Vec<AppCheck>,
    pub version: String,
}

/// Resource usage of one instance, or of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    /// 0..=100 per core
    #[serde(rename = "CpuUsage")]
    pub cpu_usage_percent: u64,

    #[serde(rename = "MemoryUsage")]
    pub memory_usage_bytes: u64,

    #[serde(rename = "NetworkUsage")]
    pub network_rx_bytes: u64,
}

/// Lifecycle status of a deployed application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    /// Not yet attempted
    #[default]
    #[serde(rename = "")]
    Pending,
    Running,
    InstallationFailed,
    ChecksFailed,
    Failed,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Pending => "",
            AppStatus::Running => "running",
            AppStatus::InstallationFailed => "installation_failed",
            AppStatus::ChecksFailed => "checks_failed",
            AppStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Application {
    pub name: String,
    pub state: AppStatus,
    pub version: String,
    pub change_id: String,
    pub metrics: Metric,
}

/// One deployed application instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApplicationState {
    #[serde(rename = "DockerAppId")]
    pub instance_id: String,
    pub name: String,
    pub application: Application,
}

/// Outbound checkin snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostCheckinDataPackage {
    pub state: Vec<ApplicationState>,
    pub changes_applied: HashMap<String, bool>,
    pub host_metrics: Metric,
}

/// Captured output of one application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLogs {
    #[serde(rename = "StdOut")]
    pub stdout: String,

    #[serde(rename = "StdErr")]
    pub stderr: String,
}

impl AppLogs {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
