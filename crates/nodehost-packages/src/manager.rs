//! Package manager facade.

use std::sync::Arc;

use nodehost_config::Config;
use nodehost_core::{NodeHostHome, PackageId};
use nodehost_events::EventBus;
use tracing::{info, warn};

use crate::artifact::{ArtifactStore, FsArtifactStore};
use crate::download::{ArtifactDownloader, HttpArtifactDownloader};
use crate::error::{PackageError, PackageResult};
use crate::installer::{InstallationExecutor, InstallationRequest};
use crate::registry::InstallationRegistry;
use crate::repository::{HttpPackageListFetcher, PackageListFetcher, Repository, RepositoryManager};
use crate::store::{AtomicFile, FileRegistryStore, RegistryStore};
use crate::types::{InstalledPackage, PackageInfo};

/// Ties the registry, repositories, and installer together.
#[derive(Debug, Clone)]
pub struct PackageManager {
    registry: Arc<InstallationRegistry>,
    repositories: Arc<RepositoryManager>,
    executor: InstallationExecutor,
    artifacts: Arc<dyn ArtifactStore>,
}

impl PackageManager {
    /// Open the file-backed stores under `home` using HTTP collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory, registry, or repository list
    /// cannot be opened.
    pub async fn open(
        home: &NodeHostHome,
        config: &Config,
        events: Option<EventBus>,
    ) -> PackageResult<Self> {
        home.ensure()?;

        let store: Arc<dyn RegistryStore> = Arc::new(FileRegistryStore::new(home.registry_path()));
        let fetcher: Arc<dyn PackageListFetcher> = Arc::new(HttpPackageListFetcher::new(
            config.repositories.fetch_timeout(),
        )?);
        let downloader: Arc<dyn ArtifactDownloader> = Arc::new(HttpArtifactDownloader::new(
            config.installer.download_timeout(),
            config.installer.max_artifact_bytes,
        )?);
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(home.packages_dir()));

        let registry = InstallationRegistry::open(store, events.clone()).await?;
        let repositories = RepositoryManager::open(
            AtomicFile::new(home.repositories_path()),
            Repository::from_config(&config.repositories.default)?,
            fetcher,
            config.repositories.fetch_timeout(),
            events,
        )
        .await?;
        let executor = InstallationExecutor::new(
            downloader,
            Arc::clone(&artifacts),
            config.installer.download_timeout(),
        );

        Ok(Self::from_parts(
            Arc::new(registry),
            Arc::new(repositories),
            executor,
            artifacts,
        ))
    }

    /// Assemble a manager from already-opened parts.
    #[must_use]
    pub fn from_parts(
        registry: Arc<InstallationRegistry>,
        repositories: Arc<RepositoryManager>,
        executor: InstallationExecutor,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            registry,
            repositories,
            executor,
            artifacts,
        }
    }

    /// The installation registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<InstallationRegistry> {
        &self.registry
    }

    /// The repository manager.
    #[must_use]
    pub fn repositories(&self) -> &Arc<RepositoryManager> {
        &self.repositories
    }

    /// Build and commit an installation.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::AlreadyInstalled`] if the package is already
    /// installed (checked before any download), any error from the
    /// executor, or a registry error from the commit. A commit that loses
    /// a race to a concurrent install discards the new artifact.
    pub async fn install(&self, request: InstallationRequest) -> PackageResult<InstalledPackage> {
        if let Some(package) = &request.package
            && self.registry.is_installed(&package.id)
        {
            return Err(PackageError::AlreadyInstalled(package.id.clone()));
        }

        let installed = self.executor.execute_installation(request).await?;
        match self.registry.register(installed.clone()).await {
            Ok(()) => {
                info!(package_id = %installed.package_id, "Installed package");
                Ok(installed)
            },
            Err(PackageError::AlreadyInstalled(id)) => {
                let existing = self.registry.get(&id).map(|p| p.install_path);
                if existing.as_ref() != Some(&installed.install_path)
                    && let Err(e) = self.artifacts.discard(&installed.install_path).await
                {
                    warn!(package_id = %id, error = %e, "Failed to discard artifact of losing install");
                }
                Err(PackageError::AlreadyInstalled(id))
            },
            Err(e) => Err(e),
        }
    }

    /// Remove an installation and its stored artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::NotFound`] if the package is not installed,
    /// a persistence error if the registry cannot be written, or an I/O
    /// error if the artifacts cannot be removed.
    pub async fn uninstall(&self, id: &PackageId) -> PackageResult<InstalledPackage> {
        let removed = self
            .registry
            .unregister(id)
            .await?
            .ok_or_else(|| PackageError::NotFound(id.clone()))?;
        self.artifacts.remove(&removed.package_id).await?;
        info!(package_id = %removed.package_id, "Uninstalled package");
        Ok(removed)
    }

    /// Refresh every enabled repository.
    pub async fn update_repositories(&self) -> Vec<PackageInfo> {
        self.repositories.update_all_repositories().await
    }

    /// All installations.
    #[must_use]
    pub fn installed(&self) -> Vec<InstalledPackage> {
        self.registry.list()
    }
}
