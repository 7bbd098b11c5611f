//! Loading strategies.
//!
//! A [`CodeLoader`] turns an installed package into a running
//! [`NodeHandle`]. Loaders are keyed by manifest type in a
//! [`LoaderRegistry`]; the controller never inspects the type itself, so a
//! new strategy only needs registering.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use nodehost_packages::InstalledPackage;
use tracing::{debug, info};

use crate::error::{ControllerError, ControllerResult};
use crate::node::NodeHandle;

/// A loading strategy for one manifest type.
#[async_trait]
pub trait CodeLoader: Send + Sync {
    /// The manifest type this loader handles.
    fn manifest_type(&self) -> &str;

    /// Prepare the loader. Called once when the controller starts.
    async fn initialize(&self) -> ControllerResult<()> {
        Ok(())
    }

    /// Produce a node from an installed package.
    async fn load_from_package(
        &self,
        package: &InstalledPackage,
    ) -> ControllerResult<Arc<dyn NodeHandle>>;
}

/// Loaders keyed by manifest type.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<BTreeMap<String, Arc<dyn CodeLoader>>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl LoaderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loader.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::LoaderExists`] if the type is taken.
    pub fn register(&self, loader: Arc<dyn CodeLoader>) -> ControllerResult<()> {
        let manifest_type = loader.manifest_type().to_string();
        let mut loaders = self.loaders.write().unwrap_or_else(PoisonError::into_inner);
        if loaders.contains_key(&manifest_type) {
            return Err(ControllerError::LoaderExists(manifest_type));
        }
        debug!(manifest_type = %manifest_type, "Registered loader");
        loaders.insert(manifest_type, loader);
        Ok(())
    }

    /// The loader for `manifest_type`.
    #[must_use]
    pub fn get(&self, manifest_type: &str) -> Option<Arc<dyn CodeLoader>> {
        self.loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(manifest_type)
            .cloned()
    }

    /// Registered manifest types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Initialize every loader in type order.
    ///
    /// # Errors
    ///
    /// Returns the first loader failure.
    pub async fn initialize_all(&self) -> ControllerResult<()> {
        let loaders: Vec<_> = self
            .loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for loader in loaders {
            loader.initialize().await?;
        }
        info!(loaders = self.types().len(), "Initialized loaders");
        Ok(())
    }

    /// Load `package` with the loader for its manifest type.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnsupportedType`] if no loader handles the
    /// type, or the loader's own error.
    pub async fn load(&self, package: &InstalledPackage) -> ControllerResult<Arc<dyn NodeHandle>> {
        let manifest_type = &package.manifest.manifest_type;
        let loader = self
            .get(manifest_type)
            .ok_or_else(|| ControllerError::UnsupportedType(manifest_type.clone()))?;
        loader.load_from_package(package).await
    }
}

/// Builds a node for an installed package.
pub type NodeFactory =
    Arc<dyn Fn(&InstalledPackage) -> ControllerResult<Arc<dyn NodeHandle>> + Send + Sync>;

/// In-process loader that resolves a manifest's entry point to a factory
/// registered by the host.
pub struct FactoryLoader {
    manifest_type: String,
    factories: RwLock<HashMap<String, NodeFactory>>,
}

impl std::fmt::Debug for FactoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entry_points: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("FactoryLoader")
            .field("manifest_type", &self.manifest_type)
            .field("entry_points", &entry_points)
            .finish()
    }
}

impl FactoryLoader {
    /// A loader for `manifest_type` with no factories.
    #[must_use]
    pub fn new(manifest_type: impl Into<String>) -> Self {
        Self {
            manifest_type: manifest_type.into(),
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register `factory` under `entry_point`, replacing any previous one.
    pub fn register_factory<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn(&InstalledPackage) -> ControllerResult<Arc<dyn NodeHandle>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry_point.into(), Arc::new(factory));
    }

    /// Builder form of [`register_factory`](Self::register_factory).
    #[must_use]
    pub fn with_factory<F>(self, entry_point: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&InstalledPackage) -> ControllerResult<Arc<dyn NodeHandle>> + Send + Sync + 'static,
    {
        self.register_factory(entry_point, factory);
        self
    }
}

#[async_trait]
impl CodeLoader for FactoryLoader {
    fn manifest_type(&self) -> &str {
        &self.manifest_type
    }

    async fn load_from_package(
        &self,
        package: &InstalledPackage,
    ) -> ControllerResult<Arc<dyn NodeHandle>> {
        let entry_point = &package.manifest.entry_point;
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entry_point)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownEntryPoint {
                manifest_type: self.manifest_type.clone(),
                entry_point: entry_point.clone(),
            })?;
        debug!(package_id = %package.package_id, entry_point = %entry_point, "Building node from factory");
        factory(package)
    }
}
