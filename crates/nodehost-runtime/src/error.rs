//! Controller error types.

use nodehost_capabilities::CapabilityError;
use nodehost_core::{PackageId, ProcessId};
use nodehost_packages::{ErrorKind, PackageError};
use nodehost_process::ProcessError;
use thiserror::Error;

use crate::instance::InstanceId;

/// Failure reported by node code through a [`NodeHandle`](crate::NodeHandle)
/// hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NodeError(String);

impl NodeError {
    /// Wrap a failure description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Result type for node hooks.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised by loaders and the node controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Package layer failure.
    #[error(transparent)]
    Package(#[from] PackageError),

    /// Process layer failure.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A sandbox pattern could not be built.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The package is not in the installation registry.
    #[error("package not installed: {0}")]
    NotInstalled(PackageId),

    /// No running instance of the package.
    #[error("package not loaded: {0}")]
    NotLoaded(PackageId),

    /// No instance with this id.
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// An instance already exists for the package in this namespace.
    #[error("{package_id} is already loaded in process {process_id}")]
    AlreadyLoaded {
        /// Package.
        package_id: PackageId,
        /// Namespace.
        process_id: ProcessId,
    },

    /// No loader handles the manifest type.
    #[error("unsupported manifest type: {0}")]
    UnsupportedType(String),

    /// A loader for the manifest type is already registered.
    #[error("a loader for '{0}' is already registered")]
    LoaderExists(String),

    /// The loader has nothing registered under the entry point.
    #[error("no '{manifest_type}' entry point named '{entry_point}'")]
    UnknownEntryPoint {
        /// Loader type.
        manifest_type: String,
        /// Requested entry point.
        entry_point: String,
    },

    /// The loader failed to produce a node.
    #[error("failed to load {package_id}: {message}")]
    LoadFailed {
        /// Package being loaded.
        package_id: PackageId,
        /// Underlying failure.
        message: String,
    },

    /// The node's initialize hook failed.
    #[error("{package_id} failed to initialize: {source}")]
    InitFailed {
        /// Package being loaded.
        package_id: PackageId,
        /// Hook failure.
        source: NodeError,
    },

    /// A node hook or loader did not finish in time.
    #[error("{hook} for {package_id} timed out after {secs}s")]
    HookTimeout {
        /// Package involved.
        package_id: PackageId,
        /// Which hook.
        hook: &'static str,
        /// The bound that was exceeded.
        secs: u64,
    },

    /// The controller is not in a state that accepts the call.
    #[error("controller is {0}")]
    NotReady(&'static str),

    /// A command message was malformed.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A command name has no handler.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

impl ControllerError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Package(e) => e.kind(),
            Self::Process(e) => match e {
                ProcessError::NotFound(_) => ErrorKind::NotFound,
                ProcessError::AlreadyRegistered(_) => ErrorKind::Conflict,
                ProcessError::InvalidPath(_) | ProcessError::NotAChild { .. } => {
                    ErrorKind::Validation
                },
                ProcessError::Io(_) => ErrorKind::Persistence,
                e if e.is_security_violation() => ErrorKind::Security,
                _ => ErrorKind::Collaborator,
            },
            Self::NotInstalled(_) | Self::NotLoaded(_) | Self::InstanceNotFound(_) => {
                ErrorKind::NotFound
            },
            Self::AlreadyLoaded { .. } | Self::LoaderExists(_) | Self::NotReady(_) => {
                ErrorKind::Conflict
            },
            Self::Capability(_)
            | Self::UnsupportedType(_)
            | Self::InvalidCommand(_)
            | Self::UnknownCommand(_) => ErrorKind::Validation,
            Self::UnknownEntryPoint { .. } | Self::LoadFailed { .. } | Self::InitFailed { .. } => {
                ErrorKind::Collaborator
            },
            Self::HookTimeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use nodehost_core::NodePath;

    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let id = PackageId::lookup("weather").unwrap();
        assert_eq!(ControllerError::NotLoaded(id.clone()).kind(), ErrorKind::NotFound);
        assert_eq!(
            ControllerError::AlreadyLoaded {
                package_id: id.clone(),
                process_id: ProcessId::new("weather").unwrap(),
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ControllerError::HookTimeout {
                package_id: id.clone(),
                hook: "initialize",
                secs: 1,
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ControllerError::Package(PackageError::NotFound(id)).kind(),
            ErrorKind::NotFound
        );
        let denied = ProcessError::SecurityViolation {
            caller: NodePath::root(),
            target: NodePath::root(),
            operation: None,
            reason: "no".into(),
        };
        assert_eq!(ControllerError::Process(denied).kind(), ErrorKind::Security);
    }
}
