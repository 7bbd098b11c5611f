pub(crate) mod package;
pub(crate) mod repo;

use anyhow::Context;
use nodehost_config::Config;
use nodehost_core::NodeHostHome;
use nodehost_packages::PackageManager;
use tracing::debug;

/// Open the package manager over `home` with its layered configuration.
pub(crate) async fn open_manager(
    home: &NodeHostHome,
    config: &Config,
) -> anyhow::Result<PackageManager> {
    let manager = PackageManager::open(home, config, None)
        .await
        .with_context(|| format!("failed to open package state in {}", home.root().display()))?;
    debug!(
        home = %home.root().display(),
        installed = manager.installed().len(),
        "Opened package state"
    );
    Ok(manager)
}
