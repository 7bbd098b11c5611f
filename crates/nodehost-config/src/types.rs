use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node controller settings.
    pub controller: ControllerConfig,
    /// Repository settings.
    pub repositories: RepositoriesConfig,
    /// Installer settings.
    pub installer: InstallerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Node controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Upper bound on a node's initialize hook.
    pub init_timeout_secs: u64,
    /// Upper bound on a node's shutdown hook.
    pub shutdown_timeout_secs: u64,
    /// Load autoload packages when the controller starts.
    pub autostart: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            autostart: true,
        }
    }
}

impl ControllerConfig {
    /// Initialize hook timeout.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    /// Shutdown hook timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoriesConfig {
    /// Upper bound on fetching one repository's package list.
    pub fetch_timeout_secs: u64,
    /// Repository seeded on first run.
    pub default: DefaultRepositoryConfig,
}

impl Default for RepositoriesConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 15,
            default: DefaultRepositoryConfig::default(),
        }
    }
}

impl RepositoriesConfig {
    /// Per-repository fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// The well-known repository seeded on first run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultRepositoryConfig {
    /// Repository id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Package list URL.
    pub url: String,
    /// Optional verification key URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_url: Option<String>,
}

impl Default for DefaultRepositoryConfig {
    fn default() -> Self {
        Self {
            id: "main".to_owned(),
            name: "Nodehost Main".to_owned(),
            url: "https://packages.nodehost.dev/index.json".to_owned(),
            key_url: None,
        }
    }
}

/// Installer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Upper bound on downloading one artifact.
    pub download_timeout_secs: u64,
    /// Largest artifact accepted, in bytes.
    pub max_artifact_bytes: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: 120,
            max_artifact_bytes: 268_435_456,
        }
    }
}

impl InstallerConfig {
    /// Artifact download timeout.
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Output format (`pretty`, `compact`, `json`, `full`).
    pub format: String,
    /// Extra `EnvFilter` directives, e.g. `nodehost_process=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
