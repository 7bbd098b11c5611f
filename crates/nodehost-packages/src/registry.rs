//! Installation registry.
//!
//! Holds every committed [`InstalledPackage`] in a concurrent map mirrored
//! to a [`RegistryStore`]. Mutations are serialized through a single-writer
//! lock and follow one order: update memory, persist the entire map, then
//! publish an event.
//!
//! A failed persist is reported to the caller but the in-memory change is
//! kept. [`InstallationRegistry::reload`] re-reads the durable store as the
//! source of truth and is run at startup to reconcile any divergence.

use std::sync::Arc;

use dashmap::DashMap;
use nodehost_core::PackageId;
use nodehost_events::{EventBus, EventMetadata, NodeHostEvent};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::codec::InstalledState;
use crate::error::{PackageError, PackageResult};
use crate::store::RegistryStore;
use crate::types::InstalledPackage;

const EVENT_SOURCE: &str = "installation-registry";

/// Persisted map of installed packages.
#[derive(Debug)]
pub struct InstallationRegistry {
    packages: DashMap<String, InstalledPackage>,
    store: Arc<dyn RegistryStore>,
    writer: Mutex<()>,
    events: Option<EventBus>,
}

impl InstallationRegistry {
    /// Open the registry, loading (or creating) the durable store.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing store cannot be read or decoded, or a
    /// new empty store cannot be written.
    pub async fn open(
        store: Arc<dyn RegistryStore>,
        events: Option<EventBus>,
    ) -> PackageResult<Self> {
        let state = store.load_or_create().await?;
        info!(packages = state.len(), "Opened installation registry");
        Ok(Self {
            packages: state.into_iter().collect(),
            store,
            writer: Mutex::new(()),
            events,
        })
    }

    /// Commit a new installation.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::AlreadyInstalled`] (with no state change) if
    /// the package id is taken, or a persistence error if the store write
    /// fails. In the latter case the package stays registered in memory.
    pub async fn register(&self, package: InstalledPackage) -> PackageResult<()> {
        let _writer = self.writer.lock().await;
        let key = package.package_id.id().to_string();
        if self.packages.contains_key(&key) {
            return Err(PackageError::AlreadyInstalled(package.package_id));
        }

        let package_id = package.package_id.clone();
        let process_id = package.process_config.process_id().clone();
        self.packages.insert(key, package);
        self.persist().await?;

        info!(package_id = %package_id, process_id = %process_id, "Registered installed package");
        self.publish(NodeHostEvent::PackageInstalled {
            metadata: EventMetadata::new(EVENT_SOURCE),
            package_id,
            process_id,
        });
        Ok(())
    }

    /// Replace an installation, returning the previous record if any.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store write fails.
    pub async fn reinstall(
        &self,
        package: InstalledPackage,
    ) -> PackageResult<Option<InstalledPackage>> {
        let _writer = self.writer.lock().await;
        let package_id = package.package_id.clone();
        let process_id = package.process_config.process_id().clone();
        let previous = self
            .packages
            .insert(package_id.id().to_string(), package);
        self.persist().await?;

        info!(
            package_id = %package_id,
            replaced = previous.is_some(),
            "Reinstalled package"
        );
        self.publish(NodeHostEvent::PackageInstalled {
            metadata: EventMetadata::new(EVENT_SOURCE),
            package_id,
            process_id,
        });
        Ok(previous)
    }

    /// Remove an installation, returning it if it was present.
    ///
    /// Removing an unknown package is not an error and touches nothing.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store write fails. The record is
    /// already gone from memory in that case.
    pub async fn unregister(&self, id: &PackageId) -> PackageResult<Option<InstalledPackage>> {
        let _writer = self.writer.lock().await;
        let Some((_, removed)) = self.packages.remove(id.id()) else {
            return Ok(None);
        };
        self.persist().await?;

        info!(package_id = %removed.package_id, "Unregistered installed package");
        self.publish(NodeHostEvent::PackageUninstalled {
            metadata: EventMetadata::new(EVENT_SOURCE),
            package_id: removed.package_id.clone(),
        });
        Ok(Some(removed))
    }

    /// Look up an installation. The version in `id` is ignored.
    #[must_use]
    pub fn get(&self, id: &PackageId) -> Option<InstalledPackage> {
        self.packages.get(id.id()).map(|entry| entry.value().clone())
    }

    /// All installations, ordered by package id.
    #[must_use]
    pub fn list(&self) -> Vec<InstalledPackage> {
        self.snapshot().into_values().collect()
    }

    /// Whether `id` is installed.
    #[must_use]
    pub fn is_installed(&self, id: &PackageId) -> bool {
        self.packages.contains_key(id.id())
    }

    /// Number of installations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether nothing is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Replace the in-memory map with the durable store's contents.
    ///
    /// Returns the number of packages loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read. Memory is left
    /// untouched in that case.
    pub async fn reload(&self) -> PackageResult<usize> {
        let _writer = self.writer.lock().await;
        let state = self.store.load_or_create().await?;
        let count = state.len();
        self.packages.clear();
        for (key, package) in state {
            self.packages.insert(key, package);
        }
        info!(packages = count, "Reloaded installation registry from store");
        Ok(count)
    }

    fn snapshot(&self) -> InstalledState {
        self.packages
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Caller must hold the writer lock.
    async fn persist(&self) -> PackageResult<()> {
        let state = self.snapshot();
        self.store.save(&state).await.inspect_err(|e| {
            error!(error = %e, "Failed to persist installation registry");
        })
    }

    fn publish(&self, event: NodeHostEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use nodehost_capabilities::NodeSecurityPolicy;
    use nodehost_core::Timestamp;

    use super::*;
    use crate::error::ErrorKind;
    use crate::manifest::PackageManifest;
    use crate::store::FileRegistryStore;
    use crate::types::ProcessConfig;

    fn installed(id: &str) -> InstalledPackage {
        let package_id = PackageId::new(id, "1.0.0").unwrap();
        let process_config = ProcessConfig::standalone(&package_id);
        let mut policy =
            NodeSecurityPolicy::new(package_id.clone(), process_config.process_id().clone());
        policy.approve();
        InstalledPackage {
            name: id.to_string(),
            description: String::new(),
            manifest: PackageManifest::new("bundle", "main.js"),
            process_config,
            policy,
            origin_repository: "main".into(),
            installed_at: Timestamp::now(),
            install_path: PathBuf::from("/tmp/pkg"),
            package_id,
        }
    }

    /// Store whose writes can be switched off.
    #[derive(Debug, Default)]
    struct FlakyStore {
        fail_writes: AtomicBool,
        saved: std::sync::Mutex<Option<InstalledState>>,
    }

    #[async_trait]
    impl RegistryStore for FlakyStore {
        async fn load_or_create(&self) -> PackageResult<InstalledState> {
            Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
        }

        async fn save(&self, state: &InstalledState) -> PackageResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PackageError::store(std::path::Path::new("/flaky"), "disk full"));
            }
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }
    }

    async fn file_registry(dir: &tempfile::TempDir, bus: Option<EventBus>) -> InstallationRegistry {
        let store = Arc::new(FileRegistryStore::new(dir.path().join("registry.json")));
        InstallationRegistry::open(store, bus).await.unwrap()
    }

    #[tokio::test]
    async fn register_get_list_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = file_registry(&dir, None).await;
        assert!(registry.is_empty());

        registry.register(installed("weather")).await.unwrap();
        registry.register(installed("alarm")).await.unwrap();

        let id = PackageId::lookup("weather").unwrap();
        assert!(registry.is_installed(&id));
        assert_eq!(registry.get(&id).unwrap().name, "weather");
        let ids: Vec<_> = registry
            .list()
            .into_iter()
            .map(|p| p.package_id.id().to_string())
            .collect();
        assert_eq!(ids, vec!["alarm", "weather"]);

        assert!(registry.unregister(&id).await.unwrap().is_some());
        assert!(!registry.is_installed(&id));
        assert!(registry.unregister(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_register_is_conflict_without_change() {
        let dir = tempfile::tempdir().unwrap();
        let registry = file_registry(&dir, None).await;
        let first = installed("weather");
        registry.register(first.clone()).await.unwrap();

        let mut second = installed("weather");
        second.name = "impostor".into();
        let err = registry.register(second).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            registry.get(&first.package_id).unwrap().name,
            "weather"
        );
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let original = installed("weather");
        {
            let registry = file_registry(&dir, None).await;
            registry.register(original.clone()).await.unwrap();
        }
        let reopened = file_registry(&dir, None).await;
        assert_eq!(reopened.get(&original.package_id).unwrap(), original);
    }

    #[tokio::test]
    async fn reinstall_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let registry = file_registry(&dir, None).await;
        registry.register(installed("weather")).await.unwrap();

        let mut newer = installed("weather");
        newer.package_id = PackageId::new("weather", "2.0.0").unwrap();
        let previous = registry.reinstall(newer).await.unwrap().unwrap();
        assert_eq!(previous.package_id.version(), "1.0.0");
        let current = registry.get(&PackageId::lookup("weather").unwrap()).unwrap();
        assert_eq!(current.package_id.version(), "2.0.0");
    }

    #[tokio::test]
    async fn events_follow_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let registry = file_registry(&dir, Some(bus)).await;

        registry.register(installed("weather")).await.unwrap();
        registry
            .unregister(&PackageId::lookup("weather").unwrap())
            .await
            .unwrap();

        let types: Vec<_> = rx.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["package_installed", "package_uninstalled"]);
    }

    #[tokio::test]
    async fn failed_persist_keeps_memory_and_reload_reconciles() {
        let store = Arc::new(FlakyStore::default());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let registry = InstallationRegistry::open(store.clone(), Some(bus))
            .await
            .unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = registry.register(installed("weather")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        let id = PackageId::lookup("weather").unwrap();
        assert!(registry.is_installed(&id));
        assert!(rx.try_recv().is_none());

        store.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(registry.reload().await.unwrap(), 0);
        assert!(!registry.is_installed(&id));
    }

    #[tokio::test]
    async fn concurrent_registers_are_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(file_registry(&dir, None).await);

        let names: Vec<String> = (0..8).map(|i| format!("pkg-{i}")).collect();
        let tasks: Vec<_> = names
            .iter()
            .map(|name| {
                let registry = Arc::clone(&registry);
                let pkg = installed(name);
                tokio::spawn(async move { registry.register(pkg).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = file_registry(&dir, None).await;
        assert_eq!(reopened.len(), 8);
    }
}
