//! Service configuration for unilock.
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use nix::unistd::geteuid;

use crate::error::ServiceManagerError;

/// Configuration for a single managed service.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Bare service name; also the PID file stem.
    pub name: String,
    /// Human-readable name for status output.
    pub display_name: Option<String>,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Directory holding the PID file. Must pre-exist for the instance
    /// guarantee to be attempted.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    /// Command the backend installs/starts, where applicable.
    pub exec_start: Option<String>,
    /// Working directory for the service process.
    pub working_dir: Option<PathBuf>,
    /// Environment variables passed to the control tool.
    pub env: Option<HashMap<String, String>>,
}

impl ServiceConfig {
    /// Creates a minimal configuration with the defaulted run directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            run_dir: default_run_dir(),
            exec_start: None,
            working_dir: None,
            env: None,
        }
    }

    /// Loads a service configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ServiceManagerError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// The PID file path this configuration implies.
    pub fn pid_path(&self) -> PathBuf {
        self.run_dir.join(format!("{}.pid", self.name))
    }

    /// The name shown to users: the display name when set, else the bare
    /// name.
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Default run directory: `/var/run` for root, else `$XDG_RUNTIME_DIR`,
/// falling back to `/tmp`.
fn default_run_dir() -> PathBuf {
    if geteuid().is_root() {
        return PathBuf::from("/var/run");
    }

    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}
