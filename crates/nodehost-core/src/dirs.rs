//! Directory scaffolding for the nodehost home directory.
//!
//! ```text
//! ~/.nodehost/                    (NodeHostHome, or $NODEHOST_HOME)
//! ├── config.toml                   (user config layer)
//! ├── registry.json                 (installation registry)
//! ├── repositories.json             (configured repositories)
//! ├── packages/                     (content-addressed artifacts)
//! │   └── {package_id}/{hash}/artifact
//! ├── data/                         (backing store for node data interfaces)
//! └── logs/                         (rolling log files)
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the home directory.
pub const HOME_ENV: &str = "NODEHOST_HOME";

/// The nodehost home directory (`~/.nodehost/` or `$NODEHOST_HOME`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHostHome {
    root: PathBuf,
}

impl NodeHostHome {
    /// Resolve the home directory.
    ///
    /// Checks `$NODEHOST_HOME` first, then falls back to `$HOME/.nodehost/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$NODEHOST_HOME` is relative or empty, or if
    /// neither variable is set.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var(HOME_ENV) {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "NODEHOST_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither NODEHOST_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".nodehost")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the directory structure exists.
    ///
    /// Directories are owner-only (`0o700`) on Unix.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.packages_dir())?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.root(), perms.clone())?;
            std::fs::set_permissions(self.packages_dir(), perms.clone())?;
            std::fs::set_permissions(self.data_dir(), perms)?;
        }
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installed artifact directory.
    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Backing directory for node data interfaces.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Logs directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Installation registry file.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    /// Repository list file.
    #[must_use]
    pub fn repositories_path(&self) -> PathBuf {
        self.root.join("repositories.json")
    }

    /// User configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}
