//! In-memory process topology.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use nodehost_core::{NodePath, Timestamp};
use tracing::{debug, info};

use crate::error::{ProcessError, ProcessResult};
use crate::registry::{Message, ProcessHandler, ProcessInfo, ProcessRegistry, StreamSender};

struct Entry {
    handler: Arc<dyn ProcessHandler>,
    registered_at: Timestamp,
}

#[derive(Default)]
struct Topology {
    processes: BTreeMap<NodePath, Entry>,
    connections: BTreeSet<(NodePath, NodePath)>,
}

/// The host's process registry.
///
/// Intermediate paths need not be registered: a node at `/flows/a/b` can
/// exist without anything at `/flows/a`. The lock is never held across an
/// `await`; handlers are cloned out before they are called.
#[derive(Default)]
pub struct InMemoryProcessRegistry {
    topology: RwLock<Topology>,
}

impl std::fmt::Debug for InMemoryProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topology = self.read();
        f.debug_struct("InMemoryProcessRegistry")
            .field("processes", &topology.processes.len())
            .field("connections", &topology.connections.len())
            .finish()
    }
}

impl InMemoryProcessRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a process is registered at `path`.
    #[must_use]
    pub fn contains(&self, path: &NodePath) -> bool {
        self.read().processes.contains_key(path)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Topology> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Topology> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self, path: &NodePath) -> ProcessResult<Arc<dyn ProcessHandler>> {
        self.read()
            .processes
            .get(path)
            .map(|e| Arc::clone(&e.handler))
            .ok_or_else(|| ProcessError::NotFound(path.clone()))
    }
}

#[async_trait]
impl ProcessRegistry for InMemoryProcessRegistry {
    async fn register_child(
        &self,
        caller: &NodePath,
        path: &NodePath,
        handler: Arc<dyn ProcessHandler>,
    ) -> ProcessResult<()> {
        if !path.is_strictly_within(caller) {
            return Err(ProcessError::NotAChild {
                parent: caller.clone(),
                path: path.clone(),
            });
        }
        let mut topology = self.write();
        if topology.processes.contains_key(path) {
            return Err(ProcessError::AlreadyRegistered(path.clone()));
        }
        topology.processes.insert(
            path.clone(),
            Entry {
                handler,
                registered_at: Timestamp::now(),
            },
        );
        debug!(path = %path, parent = %caller, "Registered process");
        Ok(())
    }

    async fn get_process(&self, _caller: &NodePath, path: &NodePath) -> ProcessResult<ProcessInfo> {
        self.read()
            .processes
            .get(path)
            .map(|e| ProcessInfo {
                path: path.clone(),
                registered_at: e.registered_at,
            })
            .ok_or_else(|| ProcessError::NotFound(path.clone()))
    }

    async fn request(
        &self,
        caller: &NodePath,
        target: &NodePath,
        message: Message,
    ) -> ProcessResult<Message> {
        let handler = self.handler(target)?;
        handler.handle_message(caller, message).await
    }

    async fn request_stream_channel(
        &self,
        caller: &NodePath,
        target: &NodePath,
    ) -> ProcessResult<StreamSender> {
        let handler = self.handler(target)?;
        handler.open_stream(caller, target).await
    }

    async fn connect(
        &self,
        _caller: &NodePath,
        from: &NodePath,
        to: &NodePath,
    ) -> ProcessResult<()> {
        let mut topology = self.write();
        for path in [from, to] {
            if !topology.processes.contains_key(path) {
                return Err(ProcessError::NotFound(path.clone()));
            }
        }
        topology.connections.insert((from.clone(), to.clone()));
        debug!(from = %from, to = %to, "Connected processes");
        Ok(())
    }

    async fn disconnect(
        &self,
        _caller: &NodePath,
        from: &NodePath,
        to: &NodePath,
    ) -> ProcessResult<bool> {
        Ok(self
            .write()
            .connections
            .remove(&(from.clone(), to.clone())))
    }

    async fn kill_process(
        &self,
        caller: &NodePath,
        target: &NodePath,
    ) -> ProcessResult<Vec<NodePath>> {
        let mut topology = self.write();
        let removed: Vec<NodePath> = topology
            .processes
            .keys()
            .filter(|p| p.is_within(target))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Err(ProcessError::NotFound(target.clone()));
        }
        for path in &removed {
            topology.processes.remove(path);
        }
        topology
            .connections
            .retain(|(from, to)| !from.is_within(target) && !to.is_within(target));
        info!(target = %target, caller = %caller, removed = removed.len(), "Killed process subtree");
        Ok(removed)
    }

    async fn children(&self, _caller: &NodePath, path: &NodePath) -> ProcessResult<Vec<NodePath>> {
        Ok(self
            .read()
            .processes
            .keys()
            .filter(|p| p.parent().as_ref() == Some(path))
            .cloned()
            .collect())
    }

    async fn upstreams(&self, _caller: &NodePath, path: &NodePath) -> ProcessResult<Vec<NodePath>> {
        Ok(self
            .read()
            .connections
            .iter()
            .filter(|(_, to)| to == path)
            .map(|(from, _)| from.clone())
            .collect())
    }

    async fn downstreams(
        &self,
        _caller: &NodePath,
        path: &NodePath,
    ) -> ProcessResult<Vec<NodePath>> {
        Ok(self
            .read()
            .connections
            .iter()
            .filter(|(from, _)| from == path)
            .map(|(_, to)| to.clone())
            .collect())
    }

    async fn all_paths(&self, _caller: &NodePath) -> ProcessResult<Vec<NodePath>> {
        Ok(self.read().processes.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ProcessHandler for Echo {
        async fn handle_message(&self, from: &NodePath, message: Message) -> ProcessResult<Message> {
            Ok(serde_json::json!({ "from": from.as_str(), "echo": message }))
        }
    }

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    async fn populated() -> InMemoryProcessRegistry {
        let reg = InMemoryProcessRegistry::new();
        let root = NodePath::root();
        for path in ["/flows/a/x", "/flows/a/x/worker", "/flows/b/y", "/system/node-controller"] {
            reg.register_child(&root, &p(path), Arc::new(Echo)).await.unwrap();
        }
        reg
    }

    #[tokio::test]
    async fn register_and_request() {
        let reg = populated().await;
        let reply = reg
            .request(&p("/flows/b/y"), &p("/flows/a/x"), serde_json::json!("hi"))
            .await
            .unwrap();
        assert_eq!(reply["from"], "/flows/b/y");
        assert_eq!(reply["echo"], "hi");

        assert!(matches!(
            reg.request(&NodePath::root(), &p("/nowhere"), serde_json::json!(null))
                .await,
            Err(ProcessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn registration_rules() {
        let reg = populated().await;
        let err = reg
            .register_child(&NodePath::root(), &p("/flows/a/x"), Arc::new(Echo))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyRegistered(_)));

        let err = reg
            .register_child(&p("/flows/a"), &p("/flows/b/z"), Arc::new(Echo))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotAChild { .. }));
    }

    #[tokio::test]
    async fn topology_queries() {
        let reg = populated().await;
        let root = NodePath::root();
        reg.connect(&root, &p("/flows/a/x"), &p("/flows/b/y")).await.unwrap();

        assert_eq!(
            reg.children(&root, &p("/flows/a/x")).await.unwrap(),
            vec![p("/flows/a/x/worker")]
        );
        assert_eq!(
            reg.upstreams(&root, &p("/flows/b/y")).await.unwrap(),
            vec![p("/flows/a/x")]
        );
        assert_eq!(
            reg.downstreams(&root, &p("/flows/a/x")).await.unwrap(),
            vec![p("/flows/b/y")]
        );
        assert_eq!(reg.all_paths(&root).await.unwrap().len(), 4);
        assert!(reg.disconnect(&root, &p("/flows/a/x"), &p("/flows/b/y")).await.unwrap());
        assert!(!reg.disconnect(&root, &p("/flows/a/x"), &p("/flows/b/y")).await.unwrap());
    }

    #[tokio::test]
    async fn kill_removes_subtree_and_connections() {
        let reg = populated().await;
        let root = NodePath::root();
        reg.connect(&root, &p("/flows/b/y"), &p("/flows/a/x/worker")).await.unwrap();

        let removed = reg.kill_process(&root, &p("/flows/a/x")).await.unwrap();
        assert_eq!(removed, vec![p("/flows/a/x"), p("/flows/a/x/worker")]);
        assert!(!reg.contains(&p("/flows/a/x/worker")));
        assert!(reg.downstreams(&root, &p("/flows/b/y")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_handlers_refuse_streams() {
        let reg = populated().await;
        assert!(matches!(
            reg.request_stream_channel(&NodePath::root(), &p("/flows/a/x")).await,
            Err(ProcessError::StreamsUnsupported(_))
        ));
    }
}
