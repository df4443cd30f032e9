//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/hostd/settings.json";

/// Storage layout for the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Parent of the per-instance scratch directories
    pub fn instances_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("instances"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::AgentError> {
        self.instances_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/hostd")
    }
}

/// Settings file at `path`, or the default location
pub fn settings_file(path: Option<&str>) -> File {
    File::new(path.unwrap_or(DEFAULT_SETTINGS_PATH))
}
