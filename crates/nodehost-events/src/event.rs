//! Event types.

use nodehost_capabilities::Operation;
use nodehost_core::{NodePath, PackageId, ProcessId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata common to all events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: Timestamp,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Timestamp::now(),
            source: source.into(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// All events published by nodehost components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeHostEvent {
    // ========== Installation ==========
    /// A package was committed to the installation registry.
    PackageInstalled {
        /// Event metadata.
        metadata: EventMetadata,
        /// Installed package.
        package_id: PackageId,
        /// Namespace it was installed into.
        process_id: ProcessId,
    },

    /// A package was removed from the installation registry.
    PackageUninstalled {
        /// Event metadata.
        metadata: EventMetadata,
        /// Removed package.
        package_id: PackageId,
    },

    // ========== Repositories ==========
    /// A repository was added.
    RepositoryAdded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Repository id.
        repository_id: String,
    },

    /// A repository was removed.
    RepositoryRemoved {
        /// Event metadata.
        metadata: EventMetadata,
        /// Repository id.
        repository_id: String,
    },

    /// A repository was enabled or disabled.
    RepositoryUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Repository id.
        repository_id: String,
        /// New enabled flag.
        enabled: bool,
    },

    /// Available package lists were refreshed.
    RepositoriesRefreshed {
        /// Event metadata.
        metadata: EventMetadata,
        /// Packages now available.
        package_count: usize,
        /// Repositories whose fetch failed.
        failed_repositories: Vec<String>,
    },

    // ========== Node Lifecycle ==========
    /// A node finished initializing and is running.
    NodeLoaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Running instance.
        instance_id: Uuid,
        /// Package the node was built from.
        package_id: PackageId,
        /// Namespace it runs in.
        process_id: ProcessId,
        /// Flow path it is addressable at.
        path: NodePath,
    },

    /// A node was unloaded.
    NodeUnloaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Former instance.
        instance_id: Uuid,
        /// Package the node was built from.
        package_id: PackageId,
        /// Whether its shutdown hook completed successfully.
        clean: bool,
    },

    /// A node hook failed or timed out.
    NodeCrashed {
        /// Event metadata.
        metadata: EventMetadata,
        /// Crashed instance.
        instance_id: Uuid,
        /// Package the node was built from.
        package_id: PackageId,
        /// What went wrong.
        reason: String,
    },

    // ========== Security ==========
    /// A sandboxed call was denied.
    SecurityViolation {
        /// Event metadata.
        metadata: EventMetadata,
        /// Path that made the call.
        caller: NodePath,
        /// Path the call targeted.
        target: NodePath,
        /// Attempted operation, if the call had one.
        operation: Option<Operation>,
        /// Why it was denied.
        reason: String,
    },
}

impl NodeHostEvent {
    /// Get the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::PackageInstalled { metadata, .. }
            | Self::PackageUninstalled { metadata, .. }
            | Self::RepositoryAdded { metadata, .. }
            | Self::RepositoryRemoved { metadata, .. }
            | Self::RepositoryUpdated { metadata, .. }
            | Self::RepositoriesRefreshed { metadata, .. }
            | Self::NodeLoaded { metadata, .. }
            | Self::NodeUnloaded { metadata, .. }
            | Self::NodeCrashed { metadata, .. }
            | Self::SecurityViolation { metadata, .. } => metadata,
        }
    }

    /// Get the event type as a string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PackageInstalled { .. } => "package_installed",
            Self::PackageUninstalled { .. } => "package_uninstalled",
            Self::RepositoryAdded { .. } => "repository_added",
            Self::RepositoryRemoved { .. } => "repository_removed",
            Self::RepositoryUpdated { .. } => "repository_updated",
            Self::RepositoriesRefreshed { .. } => "repositories_refreshed",
            Self::NodeLoaded { .. } => "node_loaded",
            Self::NodeUnloaded { .. } => "node_unloaded",
            Self::NodeCrashed { .. } => "node_crashed",
            Self::SecurityViolation { .. } => "security_violation",
        }
    }
}
