//! Running-instance identity and tracking.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nodehost_core::{NodePath, PackageId, ProcessId, Timestamp};
use nodehost_packages::InstalledPackage;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ControllerError, ControllerResult};
use crate::node::NodeHandle;

/// Unique id of one load of a node. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Produced by its loader, not yet initialized.
    Loading,
    /// Initialize hook running.
    Initializing,
    /// Accepting messages.
    Running,
    /// Shutdown hook running.
    Stopping,
    /// Removed after a shutdown or failed load.
    Stopped,
    /// A hook overran its timeout.
    Crashed,
}

impl InstanceState {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One loaded node. Only `state` and the crash counter change after
/// creation.
pub struct NodeInstance {
    id: InstanceId,
    package: Arc<InstalledPackage>,
    handle: Arc<dyn NodeHandle>,
    state: RwLock<InstanceState>,
    loaded_at: Timestamp,
    crash_count: AtomicU32,
}

impl fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInstance")
            .field("id", &self.id)
            .field("package_id", &self.package.package_id)
            .field("process_id", self.process_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NodeInstance {
    /// A fresh instance in [`InstanceState::Loading`].
    #[must_use]
    pub fn new(package: Arc<InstalledPackage>, handle: Arc<dyn NodeHandle>) -> Self {
        Self {
            id: InstanceId::new(),
            package,
            handle,
            state: RwLock::new(InstanceState::Loading),
            loaded_at: Timestamp::now(),
            crash_count: AtomicU32::new(0),
        }
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The installation this instance runs.
    #[must_use]
    pub fn package(&self) -> &InstalledPackage {
        &self.package
    }

    /// Package id.
    #[must_use]
    pub fn package_id(&self) -> &PackageId {
        &self.package.package_id
    }

    /// Namespace.
    #[must_use]
    pub fn process_id(&self) -> &ProcessId {
        self.package.process_config.process_id()
    }

    /// Flow path the node is addressed at.
    #[must_use]
    pub fn flow_path(&self) -> NodePath {
        self.package.flow_path()
    }

    /// The node itself.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn NodeHandle> {
        &self.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `state`.
    pub fn set_state(&self, state: InstanceState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        debug!(instance_id = %self.id, from = %*current, to = %state, "Instance state change");
        *current = state;
    }

    /// When the instance was created.
    #[must_use]
    pub fn loaded_at(&self) -> Timestamp {
        self.loaded_at
    }

    /// Hooks that overran their timeout.
    #[must_use]
    pub fn crash_count(&self) -> u32 {
        self.crash_count.load(Ordering::SeqCst)
    }

    /// Count a crash and move to [`InstanceState::Crashed`].
    pub fn record_crash(&self) -> u32 {
        self.set_state(InstanceState::Crashed);
        self.crash_count
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
    }
}

#[derive(Default)]
struct Indices {
    by_instance: HashMap<InstanceId, Arc<NodeInstance>>,
    by_package: HashMap<PackageId, BTreeSet<InstanceId>>,
    by_process: HashMap<ProcessId, BTreeSet<InstanceId>>,
}

impl Indices {
    fn insert(&mut self, instance: Arc<NodeInstance>) {
        let id = instance.id();
        self.by_package
            .entry(instance.package_id().clone())
            .or_default()
            .insert(id);
        self.by_process
            .entry(instance.process_id().clone())
            .or_default()
            .insert(id);
        self.by_instance.insert(id, instance);
    }

    fn remove(&mut self, id: InstanceId) -> Option<Arc<NodeInstance>> {
        let instance = self.by_instance.remove(&id)?;
        remove_from(&mut self.by_package, instance.package_id(), id);
        remove_from(&mut self.by_process, instance.process_id(), id);
        Some(instance)
    }

    fn select(&self, ids: Option<&BTreeSet<InstanceId>>) -> Vec<Arc<NodeInstance>> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.by_instance.get(id).cloned())
            .collect()
    }
}

fn remove_from<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, BTreeSet<InstanceId>>,
    key: &K,
    id: InstanceId,
) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Running instances, indexed by instance, package, and process.
///
/// All three indices sit behind one lock, so a reader never sees one
/// updated without the others.
#[derive(Default)]
pub struct NodeInstanceRegistry {
    indices: RwLock<Indices>,
}

impl fmt::Debug for NodeInstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInstanceRegistry")
            .field("instances", &self.len())
            .finish()
    }
}

impl NodeInstanceRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an instance.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyLoaded`] if an instance of the same
    /// package already exists in the same process namespace.
    pub fn register(&self, instance: Arc<NodeInstance>) -> ControllerResult<()> {
        let mut indices = self.write();
        let clash = indices
            .select(indices.by_package.get(instance.package_id()))
            .iter()
            .any(|other| other.process_id() == instance.process_id());
        if clash || indices.by_instance.contains_key(&instance.id()) {
            return Err(ControllerError::AlreadyLoaded {
                package_id: instance.package_id().clone(),
                process_id: instance.process_id().clone(),
            });
        }
        indices.insert(instance);
        Ok(())
    }

    /// Remove an instance from every index.
    pub fn unregister(&self, id: InstanceId) -> Option<Arc<NodeInstance>> {
        self.write().remove(id)
    }

    /// Look up by instance id.
    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<Arc<NodeInstance>> {
        self.read().by_instance.get(&id).cloned()
    }

    /// Instances of `package`.
    #[must_use]
    pub fn instances_by_package(&self, package: &PackageId) -> Vec<Arc<NodeInstance>> {
        let indices = self.read();
        indices.select(indices.by_package.get(package))
    }

    /// Instances in the `process` namespace.
    #[must_use]
    pub fn instances_by_process(&self, process: &ProcessId) -> Vec<Arc<NodeInstance>> {
        let indices = self.read();
        indices.select(indices.by_process.get(process))
    }

    /// The instance of `package` in `process`, if loaded.
    #[must_use]
    pub fn find(&self, package: &PackageId, process: &ProcessId) -> Option<Arc<NodeInstance>> {
        self.instances_by_package(package)
            .into_iter()
            .find(|i| i.process_id() == process)
    }

    /// Whether `package` is loaded in `process`.
    #[must_use]
    pub fn is_loaded(&self, package: &PackageId, process: &ProcessId) -> bool {
        self.find(package, process).is_some()
    }

    /// Every instance, ordered by package then process.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<NodeInstance>> {
        let mut all: Vec<_> = self.read().by_instance.values().cloned().collect();
        all.sort_by(|a, b| {
            (a.package_id().id(), a.process_id()).cmp(&(b.package_id().id(), b.process_id()))
        });
        all
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_instance.len()
    }

    /// Whether no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both secondary indices exactly mirror the primary one.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let indices = self.read();
        let mut by_package: HashMap<&PackageId, BTreeSet<InstanceId>> = HashMap::new();
        let mut by_process: HashMap<&ProcessId, BTreeSet<InstanceId>> = HashMap::new();
        for (id, instance) in &indices.by_instance {
            if instance.id() != *id {
                return false;
            }
            by_package.entry(instance.package_id()).or_default().insert(*id);
            by_process.entry(instance.process_id()).or_default().insert(*id);
        }
        by_package.len() == indices.by_package.len()
            && by_process.len() == indices.by_process.len()
            && indices
                .by_package
                .iter()
                .all(|(k, ids)| by_package.get(k) == Some(ids))
            && indices
                .by_process
                .iter()
                .all(|(k, ids)| by_process.get(k) == Some(ids))
    }
}
