//! Docker container engine
//!
//! Lifecycle calls go through the `docker` CLI; resource samples are streamed
//! from the Engine API socket (see [`super::stats`]).

use std::path::{Component, Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use trainer_api::models::{AppLogs, DockerConfig, InlineFile, Metric, VersionConfig};

use crate::engine::stats::{DockerStatsFeed, SampleSessions};
use crate::engine::ContainerEngine;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Docker engine options
#[derive(Debug, Clone)]
pub struct DockerEngineOptions {
    /// Docker CLI binary
    pub binary: String,

    /// Engine API socket used for stats streaming
    pub socket_path: PathBuf,

    /// Upper bound on a two-sample metrics read
    pub stats_timeout: Duration,

    /// Parent of the per-instance scratch dirs
    pub instances_dir: Dir,

    /// Where the scratch dir is mounted inside the container
    pub files_mount_path: String,
}

impl Default for DockerEngineOptions {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            socket_path: PathBuf::from("/var/run/docker.sock"),
            stats_timeout: Duration::from_secs(10),
            instances_dir: StorageLayout::default().instances_dir(),
            files_mount_path: "/files".to_string(),
        }
    }
}

impl DockerEngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            binary: settings.engine.docker_binary.clone(),
            socket_path: PathBuf::from(&settings.engine.docker_socket),
            stats_timeout: Duration::from_secs(settings.engine.stats_timeout_secs),
            instances_dir: StorageLayout::new(&settings.storage_dir).instances_dir(),
            files_mount_path: settings.engine.files_mount_path.clone(),
        }
    }
}

/// Docker-backed [`ContainerEngine`]
pub struct DockerEngine {
    options: DockerEngineOptions,
    samples: SampleSessions<DockerStatsFeed>,
}

impl DockerEngine {
    pub fn new(options: DockerEngineOptions) -> Self {
        let feed = DockerStatsFeed::new(options.socket_path.clone());
        let samples = SampleSessions::new(feed, options.stats_timeout);
        Self { options, samples }
    }

    /// Server version of the engine; fails when the daemon is unreachable
    pub async fn ping(&self) -> Result<String, AgentError> {
        let output = self
            .docker(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if !output.status.success() {
            return Err(AgentError::EngineFailure(format!(
                "docker daemon unreachable: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn docker(&self, args: &[&str]) -> Result<Output, AgentError> {
        debug!("{} {}", self.options.binary, args.join(" "));
        Command::new(&self.options.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                AgentError::EngineFailure(format!("failed to run {}: {}", self.options.binary, e))
            })
    }

    async fn docker_ok(&self, args: &[&str]) -> Result<(), AgentError> {
        let output = self.docker(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AgentError::EngineFailure(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn login(&self, docker: &DockerConfig) {
        let Some(password) = docker.password.as_ref() else {
            return;
        };
        let registry = registry_host(docker);
        let mut args = vec!["login"];
        args.extend(registry);
        args.extend(["-u", docker.username.as_str(), "--password-stdin"]);

        debug!("Authenticating with registry {}", registry.unwrap_or("docker.io"));
        let login_result: Result<bool, std::io::Error> = async {
            let mut child = Command::new(&self.options.binary)
                .args(&args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(password.expose_secret().as_bytes()).await?;
            }
            let output = child.wait_with_output().await?;
            Ok(output.status.success())
        }
        .await;

        let registry = registry.unwrap_or("docker.io");
        match login_result {
            Ok(true) => debug!("Authenticated with {}", registry),
            Ok(false) => warn!("Login to {} failed, attempting anonymous pull", registry),
            Err(e) => warn!("Failed to run docker login: {}, attempting anonymous pull", e),
        }
    }

    fn scratch_dir(&self, instance_id: &str) -> Dir {
        self.options.instances_dir.subdir(instance_id)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn install(&self, name: &str, config: &VersionConfig) -> Result<(), AgentError> {
        let image = config.docker_config.image();
        info!("Installing {} from {}", name, image);

        self.login(&config.docker_config).await;
        self.docker_ok(&["pull", image.as_str()]).await.inspect_err(|e| {
            error!("Install of {} failed: {}", name, e);
        })?;

        info!("Install of {} successful", name);
        Ok(())
    }

    async fn run(
        &self,
        instance_id: &str,
        name: &str,
        config: &VersionConfig,
    ) -> Result<(), AgentError> {
        let scratch = self.scratch_dir(instance_id);
        scratch.create().await?;
        materialize_files(&scratch, &config.files).await?;

        let args = run_args(
            instance_id,
            config,
            scratch.path(),
            &self.options.files_mount_path,
        );
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        self.docker_ok(&args).await.inspect_err(|e| {
            error!("Running {} as {} failed: {}", name, instance_id, e);
        })?;

        info!("Running {} as {} successful", name, instance_id);
        Ok(())
    }

    async fn stop(&self, instance_id: &str) -> Result<(), AgentError> {
        info!("Stopping {}", instance_id);
        self.samples.close(instance_id);

        let stopped = self.docker_ok(&["stop", instance_id]).await;
        if let Err(e) = &stopped {
            warn!("Stopping {} failed: {}", instance_id, e);
        }
        let removed = self.docker_ok(&["rm", instance_id]).await;
        if let Err(e) = &removed {
            warn!("Removing {} failed: {}", instance_id, e);
        }
        if let Err(e) = self.scratch_dir(instance_id).delete().await {
            warn!("Failed to clean scratch dir of {}: {}", instance_id, e);
        }

        stopped?;
        removed?;
        info!("Stopping {} successful", instance_id);
        Ok(())
    }

    async fn query_liveness(&self, instance_id: &str) -> bool {
        match self
            .docker(&[
                "inspect",
                "--type",
                "container",
                "--format",
                "{{.State.Running}}",
                instance_id,
            ])
            .await
        {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            Ok(_) => {
                debug!("Instance {} not found", instance_id);
                false
            }
            Err(e) => {
                debug!("Query of {} failed: {}", instance_id, e);
                false
            }
        }
    }

    async fn stream_metrics(&self, instance_id: &str) -> Result<Metric, AgentError> {
        self.samples.read_metric(instance_id).await
    }

    async fn logs(
        &self,
        instance_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AppLogs, AgentError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let until = until.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let output = self
            .docker(&["logs", "--since", since.as_str(), "--until", until.as_str(), instance_id])
            .await?;
        if !output.status.success() {
            return Err(AgentError::EngineFailure(format!(
                "docker logs failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(AppLogs {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Registry to log in to. `None` means Docker Hub, where the first path
/// segment of the repository is a namespace rather than a host.
fn registry_host(docker: &DockerConfig) -> Option<&str> {
    if !docker.server_address.is_empty() {
        return Some(docker.server_address.as_str());
    }
    let (first, _) = docker.repository.split_once('/')?;
    (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
}

/// Arguments for `docker run`
fn run_args(
    instance_id: &str,
    config: &VersionConfig,
    scratch: &Path,
    files_mount_path: &str,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        instance_id.to_string(),
    ];

    for port in &config.port_mappings {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port.host_port, port.container_port));
    }
    for volume in &config.volume_mappings {
        args.push("-v".to_string());
        args.push(format!("{}:{}", volume.host_path, volume.container_path));
    }
    for env in &config.environment_variables {
        args.push("-e".to_string());
        args.push(format!("{}={}", env.key, env.value));
    }

    args.push("-v".to_string());
    args.push(format!("{}:{}:rw", scratch.display(), files_mount_path));

    args.push(config.docker_config.image());
    args
}

/// Decode inline files into the scratch dir
async fn materialize_files(scratch: &Dir, files: &[InlineFile]) -> Result<(), AgentError> {
    for file in files {
        let relative = scratch_relative(&file.host_path).ok_or_else(|| {
            AgentError::EngineFailure(format!("refusing file path {}", file.host_path))
        })?;
        let contents = base64::engine::general_purpose::STANDARD
            .decode(file.base64_file_contents.trim())
            .map_err(|e| {
                AgentError::EngineFailure(format!("bad contents for {}: {}", file.host_path, e))
            })?;

        let target = crate::filesys::file::File::new(scratch.path().join(relative));
        target.write_bytes(&contents).await?;
        debug!("Wrote {} ({} bytes)", target.path().display(), contents.len());
    }
    Ok(())
}

/// Path below the scratch dir; `None` for paths that would escape it
fn scratch_relative(host_path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(host_path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}
