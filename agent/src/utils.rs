//! Utility functions

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::engine::docker::{DockerEngine, DockerEngineOptions};
use crate::http::client::HttpClient;
use crate::storage::settings::Settings;

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a fresh engine instance id for an application
///
/// The random suffix keeps a new instance from colliding with a stale one of
/// the same name that the engine has not finished removing.
pub fn generate_instance_id(name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", name, &suffix[..12])
}

/// Check that the container engine and the trainer are reachable
pub async fn run_diagnostic(settings: &Settings) {
    println!("{}", "hostd diagnostic".bold());

    let version = version_info();
    println!(
        "  version       {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );
    println!("  host id       {}", settings.host_id);

    let engine = DockerEngine::new(DockerEngineOptions::from_settings(settings));
    match engine.ping().await {
        Ok(server_version) => println!(
            "  docker        {} (server {})",
            "ok".green(),
            server_version
        ),
        Err(e) => println!("  docker        {} {}", "unreachable".red(), e),
    }

    match HttpClient::new(&settings.trainer.base_url) {
        Ok(client) => match client.probe().await {
            Ok(status) => println!(
                "  trainer       {} {} ({})",
                "reachable".green(),
                client.base_url(),
                status
            ),
            Err(e) => println!(
                "  trainer       {} {}: {}",
                "unreachable".red(),
                client.base_url(),
                e
            ),
        },
        Err(e) => println!("  trainer       {} {}", "invalid".red(), e),
    }
}
