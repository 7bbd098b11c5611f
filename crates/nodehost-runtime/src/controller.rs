//! The node controller.
//!
//! Owns every running node for its lifetime. Loading a node follows one
//! pipeline: resolve the installation, ask the loader for a handle,
//! register the instance, expose it at its flow path, then run its
//! initialize hook with a scoped data interface and a scoped process
//! interface. A failure at any step undoes the steps before it, so an
//! instance is either fully running or not registered at all.
//!
//! Loads and unloads of the same `(package, process)` pair are serialized
//! by a per-pair async mutex. Hooks run under the configured timeouts; an
//! overrun counts as a crash. Shutdown waits for in-flight loads to settle
//! before it unloads, and a load that settles after shutdown began is
//! refused before anything is registered.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use nodehost_capabilities::PathPattern;
use nodehost_config::ControllerConfig;
use nodehost_core::layout::{SIBLING_NODE_PATTERN, controller_path};
use nodehost_core::{NodePath, PackageId, ProcessId, Timestamp};
use nodehost_events::{EventBus, EventMetadata, NodeHostEvent};
use nodehost_packages::{InstallationRegistry, InstalledPackage, load_order};
use nodehost_process::{
    DataInterface, FsDataInterface, Message, NodeProcessInterface, ProcessError, ProcessHandler,
    ProcessRegistry, ProcessResult, StreamSender,
};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::flags::{ControllerFlags, Lifecycle};
use crate::instance::{InstanceId, InstanceState, NodeInstance, NodeInstanceRegistry};
use crate::loader::LoaderRegistry;
use crate::router::CommandRouter;

const EVENT_SOURCE: &str = "node-controller";

/// Timeouts and storage location used by the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Bound on a loader call and on a node's initialize hook.
    pub init_timeout: Duration,
    /// Bound on a node's shutdown hook.
    pub shutdown_timeout: Duration,
    /// Load autoload packages on start.
    pub autostart: bool,
    /// Directory logical data paths are stored under.
    pub data_root: PathBuf,
}

impl ControllerSettings {
    /// Settings from the `[controller]` config section.
    #[must_use]
    pub fn from_config(config: &ControllerConfig, data_root: impl Into<PathBuf>) -> Self {
        Self {
            init_timeout: config.init_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            autostart: config.autostart,
            data_root: data_root.into(),
        }
    }
}

/// Snapshot of one running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// Instance id.
    pub instance_id: InstanceId,
    /// Package id.
    pub package_id: String,
    /// Installed version.
    pub version: String,
    /// Namespace.
    pub process_id: ProcessId,
    /// Flow path.
    pub path: NodePath,
    /// Lifecycle state.
    pub state: InstanceState,
    /// When the instance was created.
    pub loaded_at: Timestamp,
    /// Seconds since `loaded_at`.
    pub uptime_secs: i64,
    /// Hook overruns.
    pub crash_count: u32,
}

impl NodeStatus {
    fn of(instance: &NodeInstance) -> Self {
        Self {
            instance_id: instance.id(),
            package_id: instance.package_id().id().to_string(),
            version: instance.package_id().version().to_string(),
            process_id: instance.process_id().clone(),
            path: instance.flow_path(),
            state: instance.state(),
            loaded_at: instance.loaded_at(),
            uptime_secs: Utc::now()
                .signed_duration_since(instance.loaded_at().into_inner())
                .num_seconds(),
            crash_count: instance.crash_count(),
        }
    }
}

/// How an unload ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnloadOutcome {
    /// Former instance.
    pub instance_id: InstanceId,
    /// Its package.
    pub package_id: String,
    /// Whether the shutdown hook completed successfully.
    pub clean: bool,
    /// State the instance was left in.
    pub state: InstanceState,
}

/// Counts one in-flight load or unload while alive.
struct ActivityGuard<'a>(&'a watch::Sender<usize>);

impl<'a> ActivityGuard<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n = n.saturating_add(1));
        Self(counter)
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct Inner {
    settings: ControllerSettings,
    packages: Arc<InstallationRegistry>,
    loaders: Arc<LoaderRegistry>,
    processes: Arc<dyn ProcessRegistry>,
    instances: NodeInstanceRegistry,
    events: Option<EventBus>,
    lifecycle: RwLock<Lifecycle>,
    loading: watch::Sender<usize>,
    unloading: watch::Sender<usize>,
    locks: DashMap<(String, ProcessId), Arc<Mutex<()>>>,
    router: CommandRouter,
}

/// Loads, runs, and unloads nodes.
#[derive(Clone)]
pub struct NodeController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NodeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeController")
            .field("flags", &self.flags())
            .field("instances", &self.inner.instances.len())
            .finish_non_exhaustive()
    }
}

impl NodeController {
    /// Create a controller. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        settings: ControllerSettings,
        packages: Arc<InstallationRegistry>,
        loaders: Arc<LoaderRegistry>,
        processes: Arc<dyn ProcessRegistry>,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                packages,
                loaders,
                processes,
                instances: NodeInstanceRegistry::new(),
                events,
                lifecycle: RwLock::new(Lifecycle::Created),
                loading: watch::Sender::new(0),
                unloading: watch::Sender::new(0),
                locks: DashMap::new(),
                router: CommandRouter::standard(),
            }),
        }
    }

    /// Current activity flags.
    #[must_use]
    pub fn flags(&self) -> ControllerFlags {
        let mut flags = match self.lifecycle() {
            Lifecycle::Initializing => ControllerFlags::INITIALIZING,
            Lifecycle::Ready => ControllerFlags::READY,
            Lifecycle::Created | Lifecycle::ShuttingDown | Lifecycle::Stopped => {
                ControllerFlags::empty()
            },
        };
        if *self.inner.loading.borrow() > 0 {
            flags |= ControllerFlags::LOADING_NODE;
        }
        if *self.inner.unloading.borrow() > 0 {
            flags |= ControllerFlags::UNLOADING_NODE;
        }
        flags
    }

    /// Running instances.
    #[must_use]
    pub fn instances(&self) -> &NodeInstanceRegistry {
        &self.inner.instances
    }

    /// The installation registry nodes are loaded from.
    #[must_use]
    pub fn packages(&self) -> &Arc<InstallationRegistry> {
        &self.inner.packages
    }

    fn lifecycle(&self) -> Lifecycle {
        *self
            .inner
            .lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        let mut lifecycle = self
            .inner
            .lifecycle
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(from = lifecycle.as_str(), to = next.as_str(), "Controller lifecycle change");
        *lifecycle = next;
    }

    /// Count a load as in flight, unless the controller no longer accepts
    /// loads. The check and the count happen under the lifecycle lock, so
    /// [`shutdown`](Self::shutdown) either sees the load or refuses it.
    fn enter_load(&self) -> ControllerResult<ActivityGuard<'_>> {
        let lifecycle = self
            .inner
            .lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if !matches!(*lifecycle, Lifecycle::Initializing | Lifecycle::Ready) {
            return Err(ControllerError::NotReady(lifecycle.as_str()));
        }
        Ok(ActivityGuard::enter(&self.inner.loading))
    }

    fn ensure_accepting(&self) -> ControllerResult<()> {
        match self.lifecycle() {
            Lifecycle::Initializing | Lifecycle::Ready => Ok(()),
            other => Err(ControllerError::NotReady(other.as_str())),
        }
    }

    fn publish(&self, event: NodeHostEvent) {
        if let Some(bus) = &self.inner.events {
            bus.publish(event);
        }
    }

    fn pair_lock(&self, package: &PackageId, process: &ProcessId) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry((package.id().to_string(), process.clone()))
            .or_default()
            .clone()
    }

    /// Start the controller: reconcile the installation registry with its
    /// durable store, initialize loaders, expose the controller at its
    /// path, and autostart packages flagged for it. Returns the number of
    /// nodes autostarted.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotReady`] if already started, or the
    /// reconciliation, loader, or registration failure. Individual
    /// autostart failures are logged and do not fail the start.
    pub async fn start(&self) -> ControllerResult<usize> {
        {
            let mut lifecycle = self
                .inner
                .lifecycle
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *lifecycle != Lifecycle::Created {
                return Err(ControllerError::NotReady(lifecycle.as_str()));
            }
            *lifecycle = Lifecycle::Initializing;
        }
        info!("Starting node controller");

        match self.bring_up().await {
            Ok(started) => {
                {
                    let mut lifecycle = self
                        .inner
                        .lifecycle
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    if *lifecycle != Lifecycle::Initializing {
                        return Err(ControllerError::NotReady(lifecycle.as_str()));
                    }
                    *lifecycle = Lifecycle::Ready;
                }
                info!(autostarted = started, loaders = ?self.inner.loaders.types(), "Node controller ready");
                Ok(started)
            },
            Err(e) => {
                error!(error = %e, "Node controller failed to start");
                self.set_lifecycle(Lifecycle::Stopped);
                Err(e)
            },
        }
    }

    async fn bring_up(&self) -> ControllerResult<usize> {
        let reconciled = self.inner.packages.reload().await?;
        debug!(packages = reconciled, "Reconciled installation registry");
        self.inner.loaders.initialize_all().await?;

        let endpoint = Arc::new(ControllerEndpoint {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner
            .processes
            .register_child(&NodePath::root(), &controller_path(), endpoint)
            .await?;

        if !self.inner.settings.autostart {
            return Ok(0);
        }
        let candidates: Vec<InstalledPackage> = self
            .inner
            .packages
            .list()
            .into_iter()
            .filter(|p| p.manifest.autoload)
            .collect();
        let ordered = match load_order(&candidates) {
            Ok(ordered) => ordered,
            Err(e) => {
                warn!(error = %e, "Autoload order unresolved, skipping autostart");
                return Ok(0);
            },
        };

        let mut started = 0usize;
        for package in ordered {
            let package_id = package.package_id.clone();
            match self.load_installed(package).await {
                Ok(instance_id) => {
                    started = started.saturating_add(1);
                    debug!(package_id = %package_id, instance_id = %instance_id, "Autostarted node");
                },
                Err(e) => warn!(package_id = %package_id, error = %e, "Autostart failed"),
            }
        }
        Ok(started)
    }

    /// Load an installed package by id.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotInstalled`] if the package is not in
    /// the installation registry, otherwise as [`load_installed`](Self::load_installed).
    pub async fn load_node(&self, package_id: &PackageId) -> ControllerResult<InstanceId> {
        let package = self
            .inner
            .packages
            .get(package_id)
            .ok_or_else(|| ControllerError::NotInstalled(package_id.clone()))?;
        self.load_installed(package).await
    }

    /// Load `package` and bring it to [`InstanceState::Running`].
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyLoaded`] if an instance of the
    /// package already runs in its namespace (nothing is touched), a loader
    /// or hook failure, or a timeout. On any failure after the loader
    /// returns, the instance and its process registration are removed.
    pub async fn load_installed(&self, package: InstalledPackage) -> ControllerResult<InstanceId> {
        let _activity = self.enter_load()?;

        let package_id = package.package_id.clone();
        let process_id = package.process_config.process_id().clone();
        let lock = self.pair_lock(&package_id, &process_id);
        let _serial = lock.lock().await;

        self.ensure_accepting()?;
        if self.inner.instances.is_loaded(&package_id, &process_id) {
            return Err(ControllerError::AlreadyLoaded {
                package_id,
                process_id,
            });
        }
        info!(package_id = %package_id, process_id = %process_id, "Loading node");

        let timeout = self.inner.settings.init_timeout;
        let handle = tokio::time::timeout(timeout, self.inner.loaders.load(&package))
            .await
            .map_err(|_| ControllerError::HookTimeout {
                package_id: package_id.clone(),
                hook: "load",
                secs: timeout.as_secs(),
            })?
            .inspect_err(|e| warn!(package_id = %package_id, error = %e, "Loader failed"))?;

        // The handle was never initialized, so dropping it is enough.
        if let Err(e) = self.ensure_accepting() {
            info!(package_id = %package_id, "Controller stopping, discarding loaded node");
            return Err(e);
        }

        let instance = Arc::new(NodeInstance::new(Arc::new(package), handle));
        self.inner.instances.register(Arc::clone(&instance))?;

        let flow_path = instance.flow_path();
        let endpoint = Arc::new(NodeEndpoint {
            instance: Arc::clone(&instance),
        });
        if let Err(e) = self
            .inner
            .processes
            .register_child(&NodePath::root(), &flow_path, endpoint)
            .await
        {
            self.inner.instances.unregister(instance.id());
            instance.set_state(InstanceState::Stopped);
            warn!(package_id = %package_id, path = %flow_path, error = %e, "Flow path unavailable");
            return Err(e.into());
        }

        if let Err(e) = self.initialize(&instance).await {
            self.discard(&instance).await;
            return Err(e);
        }

        instance.set_state(InstanceState::Running);
        info!(
            package_id = %package_id,
            process_id = %process_id,
            instance_id = %instance.id(),
            path = %flow_path,
            "Node running"
        );
        self.publish(NodeHostEvent::NodeLoaded {
            metadata: EventMetadata::new(EVENT_SOURCE),
            instance_id: instance.id().as_uuid(),
            package_id,
            process_id,
            path: flow_path,
        });
        Ok(instance.id())
    }

    /// The sandbox a node of `package` runs behind: its flow subtree, plus
    /// the controller, sibling node paths, and its own runtime subtree as
    /// reachable targets subject to the package policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime subtree pattern cannot be built.
    pub fn process_interface_for(
        &self,
        package: &InstalledPackage,
    ) -> ControllerResult<NodeProcessInterface> {
        let reach = vec![
            PathPattern::exact(&controller_path()),
            PathPattern::new(SIBLING_NODE_PATTERN)?,
            PathPattern::subtree(&package.runtime_path())?,
        ];
        let interface = NodeProcessInterface::new(
            Arc::clone(&self.inner.processes),
            package.flow_path(),
            Arc::new(package.policy.clone()),
        )
        .with_reach(reach);
        Ok(match &self.inner.events {
            Some(bus) => interface.with_events(bus.clone()),
            None => interface,
        })
    }

    /// Storage for a node of `package`: runtime path primary, user data
    /// path alternate.
    #[must_use]
    pub fn data_interface_for(&self, package: &InstalledPackage) -> FsDataInterface {
        FsDataInterface::new(
            self.inner.settings.data_root.clone(),
            package.runtime_path(),
            Some(package.data_path()),
        )
    }

    async fn initialize(&self, instance: &Arc<NodeInstance>) -> ControllerResult<()> {
        let package = instance.package();
        let data: Arc<dyn DataInterface> = Arc::new(self.data_interface_for(package));
        let process = self.process_interface_for(package)?;

        instance.set_state(InstanceState::Initializing);
        let timeout = self.inner.settings.init_timeout;
        match tokio::time::timeout(timeout, instance.handle().initialize(data, process)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(package_id = %instance.package_id(), error = %e, "Initialize hook failed");
                Err(ControllerError::InitFailed {
                    package_id: instance.package_id().clone(),
                    source: e,
                })
            },
            Err(_) => {
                self.crashed(instance, "initialize hook timed out");
                Err(ControllerError::HookTimeout {
                    package_id: instance.package_id().clone(),
                    hook: "initialize",
                    secs: timeout.as_secs(),
                })
            },
        }
    }

    fn crashed(&self, instance: &NodeInstance, reason: &str) {
        let crashes = instance.record_crash();
        error!(
            package_id = %instance.package_id(),
            instance_id = %instance.id(),
            crashes,
            reason,
            "Node crashed"
        );
        self.publish(NodeHostEvent::NodeCrashed {
            metadata: EventMetadata::new(EVENT_SOURCE),
            instance_id: instance.id().as_uuid(),
            package_id: instance.package_id().clone(),
            reason: reason.to_string(),
        });
    }

    /// Remove a registered instance and everything it exposed.
    async fn discard(&self, instance: &NodeInstance) {
        self.inner.instances.unregister(instance.id());
        match self
            .inner
            .processes
            .kill_process(&NodePath::root(), &instance.flow_path())
            .await
        {
            Ok(_) | Err(ProcessError::NotFound(_)) => {},
            Err(e) => {
                warn!(package_id = %instance.package_id(), error = %e, "Failed to remove node processes");
            },
        }
        if instance.state() != InstanceState::Crashed {
            instance.set_state(InstanceState::Stopped);
        }
    }

    /// Unload every instance of `package_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotLoaded`] if no instance runs.
    pub async fn unload_node(&self, package_id: &PackageId) -> ControllerResult<Vec<UnloadOutcome>> {
        let instances = self.inner.instances.instances_by_package(package_id);
        if instances.is_empty() {
            return Err(ControllerError::NotLoaded(package_id.clone()));
        }
        let mut outcomes = Vec::with_capacity(instances.len());
        for instance in instances {
            match self.unload_instance(instance.id()).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(ControllerError::InstanceNotFound(_)) => {},
                Err(e) => return Err(e),
            }
        }
        if outcomes.is_empty() {
            return Err(ControllerError::NotLoaded(package_id.clone()));
        }
        Ok(outcomes)
    }

    /// Shut down and remove one instance. The instance is removed even if
    /// its shutdown hook fails or overruns.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InstanceNotFound`] if the instance is not
    /// registered.
    pub async fn unload_instance(&self, instance_id: InstanceId) -> ControllerResult<UnloadOutcome> {
        let lifecycle = self.lifecycle();
        if matches!(lifecycle, Lifecycle::Created | Lifecycle::Stopped) {
            return Err(ControllerError::NotReady(lifecycle.as_str()));
        }
        let registered = self
            .inner
            .instances
            .get(instance_id)
            .ok_or(ControllerError::InstanceNotFound(instance_id))?;
        let lock = self.pair_lock(registered.package_id(), registered.process_id());
        let _serial = lock.lock().await;
        let instance = self
            .inner
            .instances
            .get(instance_id)
            .ok_or(ControllerError::InstanceNotFound(instance_id))?;
        let _activity = ActivityGuard::enter(&self.inner.unloading);

        let package_id = instance.package_id().clone();
        info!(package_id = %package_id, instance_id = %instance_id, "Unloading node");
        instance.set_state(InstanceState::Stopping);

        let timeout = self.inner.settings.shutdown_timeout;
        let clean = match tokio::time::timeout(timeout, instance.handle().shutdown()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(package_id = %package_id, error = %e, "Shutdown hook failed");
                false
            },
            Err(_) => {
                self.crashed(&instance, "shutdown hook timed out");
                false
            },
        };

        self.discard(&instance).await;
        self.publish(NodeHostEvent::NodeUnloaded {
            metadata: EventMetadata::new(EVENT_SOURCE),
            instance_id: instance_id.as_uuid(),
            package_id: package_id.clone(),
            clean,
        });
        info!(package_id = %package_id, instance_id = %instance_id, clean, "Node unloaded");
        Ok(UnloadOutcome {
            instance_id,
            package_id: package_id.id().to_string(),
            clean,
            state: instance.state(),
        })
    }

    /// Status of every instance.
    #[must_use]
    pub fn list_nodes(&self) -> Vec<NodeStatus> {
        self.inner
            .instances
            .list()
            .iter()
            .map(|i| NodeStatus::of(i))
            .collect()
    }

    /// Status of the instances of `package_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotLoaded`] if none runs.
    pub fn node_status(&self, package_id: &PackageId) -> ControllerResult<Vec<NodeStatus>> {
        let statuses: Vec<_> = self
            .inner
            .instances
            .instances_by_package(package_id)
            .iter()
            .map(|i| NodeStatus::of(i))
            .collect();
        if statuses.is_empty() {
            return Err(ControllerError::NotLoaded(package_id.clone()));
        }
        Ok(statuses)
    }

    /// Dispatch a command message and build its reply. Never fails: errors
    /// become `{"status":"error", ...}` replies.
    pub async fn handle_command(&self, message: &Message) -> Message {
        self.inner.router.dispatch(self, message).await
    }

    /// Unload every node concurrently, then withdraw the controller.
    /// Completes once every unload has settled.
    pub async fn shutdown(&self) -> Vec<UnloadOutcome> {
        {
            let mut lifecycle = self
                .inner
                .lifecycle
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if matches!(*lifecycle, Lifecycle::Created | Lifecycle::Stopped) {
                return Vec::new();
            }
            *lifecycle = Lifecycle::ShuttingDown;
        }
        let mut loads = self.inner.loading.subscribe();
        if loads.wait_for(|n| *n == 0).await.is_err() {
            debug!("Load counter closed");
        }
        let instances = self.inner.instances.list();
        info!(instances = instances.len(), "Shutting down node controller");

        let results = join_all(instances.iter().map(|i| self.unload_instance(i.id()))).await;
        let outcomes: Vec<UnloadOutcome> = results
            .into_iter()
            .filter_map(|r| {
                r.inspect_err(|e| warn!(error = %e, "Unload during shutdown failed"))
                    .ok()
            })
            .collect();

        if let Err(e) = self
            .inner
            .processes
            .kill_process(&NodePath::root(), &controller_path())
            .await
        {
            debug!(error = %e, "Controller path already withdrawn");
        }
        self.set_lifecycle(Lifecycle::Stopped);
        info!(unloaded = outcomes.len(), "Node controller stopped");
        outcomes
    }
}

/// The controller as seen through the process registry.
struct ControllerEndpoint {
    inner: Weak<Inner>,
}

#[async_trait]
impl ProcessHandler for ControllerEndpoint {
    async fn handle_message(&self, from: &NodePath, message: Message) -> ProcessResult<Message> {
        let inner = self.inner.upgrade().ok_or_else(|| ProcessError::Handler {
            path: controller_path(),
            message: "controller stopped".into(),
        })?;
        debug!(caller = %from, "Controller command received");
        Ok(NodeController { inner }.handle_command(&message).await)
    }
}

/// A running node as seen through the process registry.
struct NodeEndpoint {
    instance: Arc<NodeInstance>,
}

impl NodeEndpoint {
    fn check_running(&self) -> ProcessResult<()> {
        match self.instance.state() {
            InstanceState::Running => Ok(()),
            state => Err(ProcessError::Handler {
                path: self.instance.flow_path(),
                message: format!("node is {state}"),
            }),
        }
    }
}

#[async_trait]
impl ProcessHandler for NodeEndpoint {
    async fn handle_message(&self, from: &NodePath, message: Message) -> ProcessResult<Message> {
        self.check_running()?;
        self.instance
            .handle()
            .handle_message(from, message)
            .await
            .map_err(|e| ProcessError::Handler {
                path: self.instance.flow_path(),
                message: e.to_string(),
            })
    }

    async fn open_stream(&self, from: &NodePath, own_path: &NodePath) -> ProcessResult<StreamSender> {
        self.check_running()?;
        self.instance
            .handle()
            .open_stream(from)
            .await
            .map_err(|e| ProcessError::Handler {
                path: own_path.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use nodehost_capabilities::{NodeSecurityPolicy, Operation, PathCapability};
    use nodehost_packages::{FileRegistryStore, PackageManifest, ProcessConfig};
    use nodehost_process::InMemoryProcessRegistry;

    use super::*;
    use crate::error::{NodeError, NodeResult};
    use crate::loader::FactoryLoader;
    use crate::node::NodeHandle;

    #[derive(Default)]
    struct TestNode {
        fail_init: bool,
        hang_init: bool,
        fail_shutdown: bool,
        hang_shutdown: bool,
        shut_down: AtomicBool,
    }

    #[async_trait]
    impl NodeHandle for TestNode {
        async fn initialize(
            &self,
            _data: Arc<dyn DataInterface>,
            _process: NodeProcessInterface,
        ) -> NodeResult<()> {
            if self.hang_init {
                std::future::pending::<()>().await;
            }
            if self.fail_init {
                return Err(NodeError::new("boom"));
            }
            Ok(())
        }

        async fn shutdown(&self) -> NodeResult<()> {
            self.shut_down.store(true, Ordering::SeqCst);
            if self.hang_shutdown {
                std::future::pending::<()>().await;
            }
            if self.fail_shutdown {
                return Err(NodeError::new("stuck"));
            }
            Ok(())
        }

        async fn handle_message(&self, _from: &NodePath, message: Message) -> NodeResult<Message> {
            Ok(serde_json::json!({ "pong": message }))
        }
    }

    fn installed(id: &str, entry_point: &str) -> InstalledPackage {
        let package_id = PackageId::new(id, "1.0.0").unwrap();
        let config = ProcessConfig::standalone(&package_id);
        let mut policy = NodeSecurityPolicy::new(package_id.clone(), config.process_id().clone());
        let runtime = config.node_runtime_path(&package_id);
        policy
            .grant(PathCapability::new(
                PathPattern::subtree(&runtime).unwrap(),
                Operation::Message,
                "own runtime subtree",
            ))
            .unwrap();
        policy.approve();
        InstalledPackage {
            package_id,
            name: id.into(),
            description: String::new(),
            manifest: PackageManifest::new("builtin", entry_point),
            process_config: config,
            policy,
            origin_repository: "test".into(),
            installed_at: Timestamp::now(),
            install_path: PathBuf::from("/tmp"),
        }
    }

    struct Harness {
        controller: NodeController,
        processes: Arc<InMemoryProcessRegistry>,
        events: EventBus,
        _dir: tempfile::TempDir,
    }

    async fn harness(packages: Vec<InstalledPackage>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            InstallationRegistry::open(
                Arc::new(FileRegistryStore::new(dir.path().join("registry.json"))),
                None,
            )
            .await
            .unwrap(),
        );
        for package in packages {
            registry.register(package).await.unwrap();
        }

        let loader = FactoryLoader::new("builtin")
            .with_factory("ok", |_| Ok(Arc::new(TestNode::default()) as Arc<dyn NodeHandle>))
            .with_factory("fail-init", |_| {
                Ok(Arc::new(TestNode {
                    fail_init: true,
                    ..TestNode::default()
                }) as Arc<dyn NodeHandle>)
            })
            .with_factory("hang-init", |_| {
                Ok(Arc::new(TestNode {
                    hang_init: true,
                    ..TestNode::default()
                }) as Arc<dyn NodeHandle>)
            })
            .with_factory("fail-shutdown", |_| {
                Ok(Arc::new(TestNode {
                    fail_shutdown: true,
                    ..TestNode::default()
                }) as Arc<dyn NodeHandle>)
            })
            .with_factory("hang-shutdown", |_| {
                Ok(Arc::new(TestNode {
                    hang_shutdown: true,
                    ..TestNode::default()
                }) as Arc<dyn NodeHandle>)
            });
        let loaders = Arc::new(LoaderRegistry::new());
        loaders.register(Arc::new(loader)).unwrap();

        let processes = Arc::new(InMemoryProcessRegistry::new());
        let events = EventBus::new();
        let settings = ControllerSettings {
            init_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_millis(200),
            autostart: false,
            data_root: dir.path().join("data"),
        };
        let controller = NodeController::new(
            settings,
            registry,
            loaders,
            Arc::clone(&processes) as Arc<dyn ProcessRegistry>,
            Some(events.clone()),
        );
        controller.start().await.unwrap();
        Harness {
            controller,
            processes,
            events,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn load_then_conflict() {
        let h = harness(vec![installed("weather", "ok")]).await;
        let id = PackageId::lookup("weather").unwrap();

        h.controller.load_node(&id).await.unwrap();
        assert!(h.processes.contains(&NodePath::parse("/flows/weather/weather").unwrap()));
        assert_eq!(h.controller.list_nodes()[0].state, InstanceState::Running);

        let err = h.controller.load_node(&id).await.unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyLoaded { .. }));
        assert_eq!(h.controller.instances().len(), 1);
        assert!(h.controller.flags().contains(ControllerFlags::READY));
        assert!(!h.controller.flags().contains(ControllerFlags::LOADING_NODE));
    }

    #[tokio::test]
    async fn failed_initialize_rolls_back() {
        let h = harness(vec![installed("weather", "fail-init")]).await;
        let id = PackageId::lookup("weather").unwrap();

        let err = h.controller.load_node(&id).await.unwrap_err();
        assert!(matches!(err, ControllerError::InitFailed { .. }));
        assert!(h.controller.instances().is_empty());
        assert!(!h.processes.contains(&NodePath::parse("/flows/weather/weather").unwrap()));
    }

    #[tokio::test]
    async fn hung_initialize_counts_as_crash() {
        let h = harness(vec![installed("weather", "hang-init")]).await;
        let id = PackageId::lookup("weather").unwrap();
        let mut crashes = h.events.subscribe_type("node_crashed");

        let err = h.controller.load_node(&id).await.unwrap_err();
        assert!(matches!(err, ControllerError::HookTimeout { hook: "initialize", .. }));
        assert!(h.controller.instances().is_empty());
        assert!(!h.processes.contains(&NodePath::parse("/flows/weather/weather").unwrap()));
        assert_eq!(crashes.drain().len(), 1);
    }

    #[tokio::test]
    async fn hung_shutdown_counts_as_crash() {
        let h = harness(vec![installed("weather", "hang-shutdown")]).await;
        let id = PackageId::lookup("weather").unwrap();
        h.controller.load_node(&id).await.unwrap();
        let instance = h.controller.instances().list().remove(0);
        let mut crashes = h.events.subscribe_type("node_crashed");

        let outcomes = tokio::time::timeout(Duration::from_secs(2), h.controller.unload_node(&id))
            .await
            .expect("unload must not wait on a hung hook")
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].clean);
        assert_eq!(outcomes[0].state, InstanceState::Crashed);
        assert_eq!(instance.crash_count(), 1);
        assert_eq!(instance.state(), InstanceState::Crashed);
        assert!(h.controller.instances().is_empty());
        assert!(!h.processes.contains(&NodePath::parse("/flows/weather/weather").unwrap()));

        let events = crashes.drain();
        assert_eq!(events.len(), 1);
        match events[0].as_ref() {
            NodeHostEvent::NodeCrashed { package_id, reason, .. } => {
                assert_eq!(package_id.id(), "weather");
                assert!(reason.contains("shutdown"));
            },
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unload_removes_even_when_shutdown_fails() {
        let h = harness(vec![installed("weather", "fail-shutdown")]).await;
        let id = PackageId::lookup("weather").unwrap();
        h.controller.load_node(&id).await.unwrap();

        let outcomes = h.controller.unload_node(&id).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].clean);
        assert_eq!(outcomes[0].state, InstanceState::Stopped);
        assert!(h.controller.instances().is_empty());
        assert!(matches!(
            h.controller.unload_node(&id).await,
            Err(ControllerError::NotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn messages_reach_running_nodes() {
        let h = harness(vec![installed("weather", "ok")]).await;
        h.controller
            .load_node(&PackageId::lookup("weather").unwrap())
            .await
            .unwrap();
        let reply = h
            .processes
            .request(
                &NodePath::root(),
                &NodePath::parse("/flows/weather/weather").unwrap(),
                serde_json::json!("ping"),
            )
            .await
            .unwrap();
        assert_eq!(reply, serde_json::json!({ "pong": "ping" }));
    }

    #[tokio::test]
    async fn shutdown_unloads_everything() {
        let h = harness(vec![installed("weather", "ok"), installed("clock", "fail-shutdown")]).await;
        for id in ["weather", "clock"] {
            h.controller
                .load_node(&PackageId::lookup(id).unwrap())
                .await
                .unwrap();
        }
        let outcomes = h.controller.shutdown().await;
        assert_eq!(outcomes.len(), 2);
        assert!(h.controller.instances().is_empty());
        assert!(!h.processes.contains(&controller_path()));
        assert!(h.controller.flags().is_empty());
        assert!(matches!(
            h.controller.load_node(&PackageId::lookup("weather").unwrap()).await,
            Err(ControllerError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn start_twice_rejected() {
        let h = harness(Vec::new()).await;
        assert!(matches!(h.controller.start().await, Err(ControllerError::NotReady(_))));
    }
}
