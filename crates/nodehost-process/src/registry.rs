//! The process-registry contract.

use std::sync::Arc;

use async_trait::async_trait;
use nodehost_core::{NodePath, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, ProcessResult};

/// Message payload exchanged between processes.
pub type Message = serde_json::Value;

/// Sending half of a stream channel opened by a handler.
pub type StreamSender = tokio::sync::mpsc::Sender<Message>;

/// Anything addressable in the process tree.
#[async_trait]
pub trait ProcessHandler: Send + Sync {
    /// Handle a request from `from` and produce a reply.
    async fn handle_message(&self, from: &NodePath, message: Message) -> ProcessResult<Message>;

    /// Open a stream channel for `from`. Handlers that do not stream keep
    /// the default, which refuses.
    async fn open_stream(&self, from: &NodePath, own_path: &NodePath) -> ProcessResult<StreamSender> {
        let _ = from;
        Err(ProcessError::StreamsUnsupported(own_path.clone()))
    }
}

/// Public description of a registered process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Where the process is registered.
    pub path: NodePath,
    /// When it was registered.
    pub registered_at: Timestamp,
}

/// Operations on the process topology. Every call names the calling path.
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// Register `handler` at `path`, which must lie strictly below `caller`.
    async fn register_child(
        &self,
        caller: &NodePath,
        path: &NodePath,
        handler: Arc<dyn ProcessHandler>,
    ) -> ProcessResult<()>;

    /// Describe the process at `path`.
    async fn get_process(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<ProcessInfo>;

    /// Send `message` to `target` and wait for its reply.
    async fn request(
        &self,
        caller: &NodePath,
        target: &NodePath,
        message: Message,
    ) -> ProcessResult<Message>;

    /// Ask `target` for a stream channel.
    async fn request_stream_channel(
        &self,
        caller: &NodePath,
        target: &NodePath,
    ) -> ProcessResult<StreamSender>;

    /// Add a directed connection `from -> to`.
    async fn connect(&self, caller: &NodePath, from: &NodePath, to: &NodePath)
    -> ProcessResult<()>;

    /// Remove a directed connection. Returns whether it existed.
    async fn disconnect(
        &self,
        caller: &NodePath,
        from: &NodePath,
        to: &NodePath,
    ) -> ProcessResult<bool>;

    /// Remove `target` and everything registered below it, along with their
    /// connections. Returns the removed paths.
    async fn kill_process(&self, caller: &NodePath, target: &NodePath)
    -> ProcessResult<Vec<NodePath>>;

    /// Registered processes exactly one level below `path`.
    async fn children(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<Vec<NodePath>>;

    /// Processes with a connection into `path`.
    async fn upstreams(&self, caller: &NodePath, path: &NodePath) -> ProcessResult<Vec<NodePath>>;

    /// Processes `path` has a connection to.
    async fn downstreams(&self, caller: &NodePath, path: &NodePath)
    -> ProcessResult<Vec<NodePath>>;

    /// Every registered path.
    async fn all_paths(&self, caller: &NodePath) -> ProcessResult<Vec<NodePath>>;
}
