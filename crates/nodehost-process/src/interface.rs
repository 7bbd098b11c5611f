//! The node sandbox.
//!
//! A [`NodeProcessInterface`] wraps another [`ProcessRegistry`] and confines
//! its user to one subtree of the process tree. Calls that stay inside the
//! subtree pass straight through. Calls that leave it must target a path the
//! interface can reach at all (its reach patterns) and be granted by its
//! policy. Anything else is a security violation.

use std::sync::Arc;

use async_trait::async_trait;
use nodehost_capabilities::{AccessPolicy, ComposedPolicy, Operation, PathPattern};
use nodehost_core::NodePath;
use nodehost_events::{EventBus, EventMetadata, NodeHostEvent};
use tracing::{debug, warn};

use crate::error::{ProcessError, ProcessResult};
use crate::registry::{Message, ProcessHandler, ProcessInfo, ProcessRegistry, StreamSender};

const EVENT_SOURCE: &str = "node-process-interface";

/// Security decorator over a [`ProcessRegistry`].
#[derive(Clone)]
pub struct NodeProcessInterface {
    delegate: Arc<dyn ProcessRegistry>,
    subtree: NodePath,
    reach: Arc<[PathPattern]>,
    policy: Arc<dyn AccessPolicy>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for NodeProcessInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeProcessInterface")
            .field("subtree", &self.subtree)
            .field("reach", &self.reach)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl NodeProcessInterface {
    /// Scope `delegate` to `subtree` under `policy`.
    ///
    /// With no reach patterns configured nothing outside the subtree is
    /// reachable, whatever the policy grants.
    #[must_use]
    pub fn new(
        delegate: Arc<dyn ProcessRegistry>,
        subtree: NodePath,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            delegate,
            subtree,
            reach: Arc::from(Vec::new()),
            policy,
            events: None,
        }
    }

    /// Paths outside the subtree that may be targeted when the policy allows.
    #[must_use]
    pub fn with_reach(mut self, reach: Vec<PathPattern>) -> Self {
        self.reach = Arc::from(reach);
        self
    }

    /// Publish `security_violation` events on `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// The owned subtree.
    #[must_use]
    pub fn subtree(&self) -> &NodePath {
        &self.subtree
    }

    /// The effective access decision for `target`.
    ///
    /// Everything inside the subtree is accessible. Outside it the target
    /// must match a reach pattern and the policy must grant `operation`.
    #[must_use]
    pub fn can_access(&self, target: &NodePath, operation: Operation) -> bool {
        target.is_within(&self.subtree)
            || (self.is_reachable(target) && self.policy.can_access(target, operation))
    }

    /// Derive an interface confined to `base` with `tighter` layered on top
    /// of this interface's policy.
    ///
    /// The child delegates to this interface, so every call it makes passes
    /// this interface's checks as well as its own.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::SecurityViolation`] if `base` is outside this
    /// interface's subtree.
    pub fn create_child_interface(
        &self,
        base: NodePath,
        tighter: Arc<dyn AccessPolicy>,
    ) -> ProcessResult<Self> {
        if !base.is_within(&self.subtree) {
            return Err(self.violation(
                &self.subtree,
                &base,
                None,
                "child base outside owned subtree",
            ));
        }
        Ok(Self {
            delegate: Arc::new(self.clone()),
            subtree: base,
            reach: Arc::clone(&self.reach),
            policy: Arc::new(ComposedPolicy::new(Arc::clone(&self.policy), tighter)),
            events: self.events.clone(),
        })
    }

    fn is_reachable(&self, target: &NodePath) -> bool {
        self.reach.iter().any(|pattern| pattern.matches(target))
    }

    fn violation(
        &self,
        caller: &NodePath,
        target: &NodePath,
        operation: Option<Operation>,
        reason: &str,
    ) -> ProcessError {
        warn!(
            subtree = %self.subtree,
            caller = %caller,
            target = %target,
            operation = ?operation,
            reason,
            "Security violation"
        );
        if let Some(bus) = &self.events {
            bus.publish(NodeHostEvent::SecurityViolation {
                metadata: EventMetadata::new(EVENT_SOURCE),
                caller: caller.clone(),
                target: target.clone(),
                operation,
                reason: reason.to_string(),
            });
        }
        ProcessError::SecurityViolation {
            caller: caller.clone(),
            target: target.clone(),
            operation,
            reason: reason.to_string(),
        }
    }

    fn check_caller(&self, caller: &NodePath, target: &NodePath) -> ProcessResult<()> {
        if caller.is_within(&self.subtree) {
            Ok(())
        } else {
            Err(self.violation(caller, target, None, "caller outside owned subtree"))
        }
    }

    fn check_inside(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<()> {
        self.check_caller(caller, path)?;
        if path.is_within(&self.subtree) {
            Ok(())
        } else {
            Err(self.violation(caller, path, None, "path outside owned subtree"))
        }
    }

    fn check_target(
        &self,
        caller: &NodePath,
        target: &NodePath,
        operation: Operation,
    ) -> ProcessResult<()> {
        self.check_caller(caller, target)?;
        if target.is_within(&self.subtree) {
            return Ok(());
        }
        if !self.is_reachable(target) {
            return Err(self.violation(caller, target, Some(operation), "target not reachable"));
        }
        if !self.policy.authorize(caller, target, operation) {
            return Err(self.violation(caller, target, Some(operation), "capability not granted"));
        }
        debug!(caller = %caller, target = %target, operation = %operation, "Cross-subtree access granted");
        Ok(())
    }

    fn confine(&self, paths: Vec<NodePath>) -> Vec<NodePath> {
        paths
            .into_iter()
            .filter(|p| p.is_within(&self.subtree))
            .collect()
    }
}

#[async_trait]
impl ProcessRegistry for NodeProcessInterface {
    async fn register_child(
        &self,
        caller: &NodePath,
        path: &NodePath,
        handler: Arc<dyn ProcessHandler>,
    ) -> ProcessResult<()> {
        self.check_inside(caller, path)?;
        self.delegate.register_child(caller, path, handler).await
    }

    async fn get_process(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<ProcessInfo> {
        self.check_inside(caller, path)?;
        self.delegate.get_process(caller, path).await
    }

    async fn request(
        &self,
        caller: &NodePath,
        target: &NodePath,
        message: Message,
    ) -> ProcessResult<Message> {
        self.check_target(caller, target, Operation::Message)?;
        self.delegate.request(caller, target, message).await
    }

    async fn request_stream_channel(
        &self,
        caller: &NodePath,
        target: &NodePath,
    ) -> ProcessResult<StreamSender> {
        self.check_target(caller, target, Operation::Stream)?;
        self.delegate.request_stream_channel(caller, target).await
    }

    async fn connect(
        &self,
        caller: &NodePath,
        from: &NodePath,
        to: &NodePath,
    ) -> ProcessResult<()> {
        self.check_inside(caller, from)?;
        self.check_target(caller, to, Operation::Connect)?;
        self.delegate.connect(caller, from, to).await
    }

    async fn disconnect(
        &self,
        caller: &NodePath,
        from: &NodePath,
        to: &NodePath,
    ) -> ProcessResult<bool> {
        self.check_inside(caller, from)?;
        self.check_target(caller, to, Operation::Connect)?;
        self.delegate.disconnect(caller, from, to).await
    }

    async fn kill_process(
        &self,
        caller: &NodePath,
        target: &NodePath,
    ) -> ProcessResult<Vec<NodePath>> {
        self.check_target(caller, target, Operation::Kill)?;
        self.delegate.kill_process(caller, target).await
    }

    async fn children(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<Vec<NodePath>> {
        self.check_inside(caller, path)?;
        Ok(self.confine(self.delegate.children(caller, path).await?))
    }

    async fn upstreams(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<Vec<NodePath>> {
        self.check_inside(caller, path)?;
        Ok(self.confine(self.delegate.upstreams(caller, path).await?))
    }

    async fn downstreams(
        &self,
        caller: &NodePath,
        path: &NodePath,
    ) -> ProcessResult<Vec<NodePath>> {
        self.check_inside(caller, path)?;
        Ok(self.confine(self.delegate.downstreams(caller, path).await?))
    }

    async fn all_paths(&self, caller: &NodePath) -> ProcessResult<Vec<NodePath>> {
        self.check_caller(caller, &self.subtree)?;
        Ok(self.confine(self.delegate.all_paths(caller).await?))
    }
}
