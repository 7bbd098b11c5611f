//! A fully wired package manager and node controller over temp storage.

use std::sync::Arc;
use std::time::Duration;

use nodehost_events::EventBus;
use nodehost_packages::{
    ArtifactDownloader, ArtifactStore, AtomicFile, FileRegistryStore, FsArtifactStore,
    InstallationExecutor, InstallationRegistry, PackageListFetcher, PackageManager, Repository,
    RepositoryManager,
};
use nodehost_process::{InMemoryProcessRegistry, ProcessRegistry};
use nodehost_runtime::{ControllerSettings, LoaderRegistry, NodeController};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::mocks::{MockDownloader, MockFetcher};

/// Id of the repository seeded by [`TestHost`].
pub const TEST_REPOSITORY: &str = "main";

/// Install logging to the test writer, once per process. Honours
/// `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options for [`TestHost::with_options`].
#[derive(Debug, Clone)]
pub struct TestHostOptions {
    /// Start the controller with autostart enabled.
    pub autostart: bool,
    /// Hook timeout used for both initialize and shutdown.
    pub hook_timeout: Duration,
}

impl Default for TestHostOptions {
    fn default() -> Self {
        Self {
            autostart: false,
            hook_timeout: Duration::from_millis(500),
        }
    }
}

/// Package manager plus an unstarted controller sharing one registry and
/// one event bus, all stored under a temp directory.
pub struct TestHost {
    /// Backing directory. Dropped with the host.
    pub dir: TempDir,
    /// Event bus shared by every component.
    pub events: EventBus,
    /// Package manager with mock collaborators.
    pub manager: PackageManager,
    /// Loaders consulted by the controller.
    pub loaders: Arc<LoaderRegistry>,
    /// Process registry the controller registers nodes in.
    pub processes: Arc<InMemoryProcessRegistry>,
    /// The controller. Call `start` before loading.
    pub controller: NodeController,
}

impl TestHost {
    /// A host with default options.
    ///
    /// # Panics
    ///
    /// Panics if the temp stores cannot be created.
    pub async fn new(fetcher: MockFetcher) -> Self {
        Self::with_options(fetcher, MockDownloader::new(), TestHostOptions::default()).await
    }

    /// A host using `fetcher` and `downloader` for repository and artifact
    /// traffic.
    ///
    /// # Panics
    ///
    /// Panics if the temp stores cannot be created.
    pub async fn with_options(
        fetcher: MockFetcher,
        downloader: MockDownloader,
        options: TestHostOptions,
    ) -> Self {
        init_test_logging();
        let dir = tempfile::tempdir().expect("temp dir");
        let events = EventBus::new();

        let registry = Arc::new(
            InstallationRegistry::open(
                Arc::new(FileRegistryStore::new(dir.path().join("registry.json"))),
                Some(events.clone()),
            )
            .await
            .expect("open registry"),
        );
        let repositories = RepositoryManager::open(
            AtomicFile::new(dir.path().join("repositories.json")),
            Repository::new(TEST_REPOSITORY, "Main", "https://packages.test/main.json")
                .expect("valid repository"),
            Arc::new(fetcher) as Arc<dyn PackageListFetcher>,
            Duration::from_secs(2),
            Some(events.clone()),
        )
        .await
        .expect("open repositories");
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(dir.path().join("packages")));
        let executor = InstallationExecutor::new(
            Arc::new(downloader) as Arc<dyn ArtifactDownloader>,
            Arc::clone(&artifacts),
            Duration::from_secs(2),
        );
        let manager = PackageManager::from_parts(
            Arc::clone(&registry),
            Arc::new(repositories),
            executor,
            artifacts,
        );

        let loaders = Arc::new(LoaderRegistry::new());
        let processes = Arc::new(InMemoryProcessRegistry::new());
        let settings = ControllerSettings {
            init_timeout: options.hook_timeout,
            shutdown_timeout: options.hook_timeout,
            autostart: options.autostart,
            data_root: dir.path().join("data"),
        };
        let controller = NodeController::new(
            settings,
            registry,
            Arc::clone(&loaders),
            Arc::clone(&processes) as Arc<dyn ProcessRegistry>,
            Some(events.clone()),
        );

        Self {
            dir,
            events,
            manager,
            loaders,
            processes,
            controller,
        }
    }
}
