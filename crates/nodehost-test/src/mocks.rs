//! Mock collaborators for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodehost_core::NodePath;
use nodehost_packages::{
    ArtifactDownloader, PackageError, PackageListFetcher, PackageResult, Repository,
};
use nodehost_process::{DataInterface, Message, NodeProcessInterface};
use nodehost_runtime::{FactoryLoader, NodeError, NodeHandle, NodeResult};

/// Manifest type served by [`mock_loader`].
pub const MOCK_MANIFEST_TYPE: &str = "mock";

/// A node that records every hook call.
///
/// Cloning shares the recorded state, so a test can keep one clone and hand
/// the other to a loader factory.
#[derive(Clone, Default)]
pub struct MockNode {
    fail_initialize: bool,
    fail_shutdown: bool,
    initialize_calls: Arc<AtomicUsize>,
    shutdown_calls: Arc<AtomicUsize>,
    messages: Arc<Mutex<Vec<(NodePath, Message)>>>,
    process: Arc<Mutex<Option<NodeProcessInterface>>>,
    data: Arc<Mutex<Option<Arc<dyn DataInterface>>>>,
}

impl MockNode {
    /// A node whose hooks all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `initialize` fail.
    #[must_use]
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Make `shutdown` fail.
    #[must_use]
    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    /// Times `initialize` ran.
    #[must_use]
    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// Times `shutdown` ran.
    #[must_use]
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Messages received so far, with their senders.
    #[must_use]
    pub fn messages(&self) -> Vec<(NodePath, Message)> {
        self.messages.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// The process interface handed to the last `initialize`.
    #[must_use]
    pub fn process_interface(&self) -> Option<NodeProcessInterface> {
        self.process.lock().ok().and_then(|g| g.clone())
    }

    /// The data interface handed to the last `initialize`.
    #[must_use]
    pub fn data_interface(&self) -> Option<Arc<dyn DataInterface>> {
        self.data.lock().ok().and_then(|g| g.clone())
    }
}

impl std::fmt::Debug for MockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNode")
            .field("fail_initialize", &self.fail_initialize)
            .field("fail_shutdown", &self.fail_shutdown)
            .field("initialize_calls", &self.initialize_calls())
            .field("shutdown_calls", &self.shutdown_calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NodeHandle for MockNode {
    async fn initialize(
        &self,
        data: Arc<dyn DataInterface>,
        process: NodeProcessInterface,
    ) -> NodeResult<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.process.lock() {
            *guard = Some(process);
        }
        if let Ok(mut guard) = self.data.lock() {
            *guard = Some(data);
        }
        if self.fail_initialize {
            return Err(NodeError::new("mock initialize failure"));
        }
        Ok(())
    }

    async fn shutdown(&self) -> NodeResult<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Err(NodeError::new("mock shutdown failure"));
        }
        Ok(())
    }

    async fn handle_message(&self, from: &NodePath, message: Message) -> NodeResult<Message> {
        if let Ok(mut guard) = self.messages.lock() {
            guard.push((from.clone(), message.clone()));
        }
        Ok(serde_json::json!({ "echo": message }))
    }
}

/// A [`FactoryLoader`] for [`MOCK_MANIFEST_TYPE`] serving `nodes` by entry
/// point. Every load of an entry point returns the same shared node.
#[must_use]
pub fn mock_loader<'a>(nodes: impl IntoIterator<Item = (&'a str, MockNode)>) -> FactoryLoader {
    let loader = FactoryLoader::new(MOCK_MANIFEST_TYPE);
    for (entry_point, node) in nodes {
        loader.register_factory(entry_point, move |_| {
            Ok(Arc::new(node.clone()) as Arc<dyn NodeHandle>)
        });
    }
    loader
}

/// Serves package-list documents from memory, keyed by repository id.
#[derive(Debug, Default)]
pub struct MockFetcher {
    documents: Mutex<HashMap<String, Result<Vec<u8>, String>>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    /// A fetcher with no documents; every fetch fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `repository`.
    #[must_use]
    pub fn with_document(self, repository: impl Into<String>, bytes: Vec<u8>) -> Self {
        if let Ok(mut guard) = self.documents.lock() {
            guard.insert(repository.into(), Ok(bytes));
        }
        self
    }

    /// Fail fetches of `repository` with `message`.
    #[must_use]
    pub fn with_failure(self, repository: impl Into<String>, message: impl Into<String>) -> Self {
        if let Ok(mut guard) = self.documents.lock() {
            guard.insert(repository.into(), Err(message.into()));
        }
        self
    }

    /// Fetches served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageListFetcher for MockFetcher {
    async fn fetch(&self, repository: &Repository) -> PackageResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self
            .documents
            .lock()
            .ok()
            .and_then(|g| g.get(&repository.id).cloned());
        match entry {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(message)) => Err(PackageError::FetchFailed {
                repository: repository.id.clone(),
                message,
            }),
            None => Err(PackageError::FetchFailed {
                repository: repository.id.clone(),
                message: "no document".into(),
            }),
        }
    }
}

/// Returns the locator's bytes as the artifact, or fails when configured to.
#[derive(Debug, Default)]
pub struct MockDownloader {
    fail: bool,
    requested: Mutex<Vec<String>>,
}

impl MockDownloader {
    /// A downloader that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A downloader that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Locators requested so far.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactDownloader for MockDownloader {
    async fn download(&self, locator: &str) -> PackageResult<Vec<u8>> {
        if let Ok(mut guard) = self.requested.lock() {
            guard.push(locator.to_string());
        }
        if self.fail {
            return Err(PackageError::DownloadFailed {
                locator: locator.to_string(),
                message: "mock download failure".into(),
            });
        }
        Ok(locator.as_bytes().to_vec())
    }
}
