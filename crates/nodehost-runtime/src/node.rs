//! The contract every loaded node implements.

use std::sync::Arc;

use async_trait::async_trait;
use nodehost_core::NodePath;
use nodehost_process::{DataInterface, Message, NodeProcessInterface, StreamSender};

use crate::error::{NodeError, NodeResult};

/// A running node produced by a [`CodeLoader`](crate::CodeLoader).
///
/// The controller calls [`initialize`](Self::initialize) exactly once after
/// loading and [`shutdown`](Self::shutdown) at most once before discarding
/// the handle. Both hooks run under a timeout; a hook that overruns is
/// treated as a crash. Messages are only delivered while the instance is
/// running.
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// Prepare the node. `data` is scoped to the node's runtime path
    /// (primary) and user data path (alternate); `process` is scoped to the
    /// node's flow path.
    async fn initialize(
        &self,
        data: Arc<dyn DataInterface>,
        process: NodeProcessInterface,
    ) -> NodeResult<()>;

    /// Release resources. Failure is logged; the node is removed regardless.
    async fn shutdown(&self) -> NodeResult<()>;

    /// Handle a message routed to the node's flow path.
    async fn handle_message(&self, from: &NodePath, message: Message) -> NodeResult<Message> {
        let _ = (from, message);
        Err(NodeError::new("node does not accept messages"))
    }

    /// Open a stream for `from`.
    async fn open_stream(&self, from: &NodePath) -> NodeResult<StreamSender> {
        let _ = from;
        Err(NodeError::new("node does not accept streams"))
    }
}
