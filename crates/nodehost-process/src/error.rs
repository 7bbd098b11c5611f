//! Process layer error types.

use nodehost_capabilities::Operation;
use nodehost_core::{CoreError, NodePath};
use thiserror::Error;

/// Errors raised by process registries, the sandbox, and data interfaces.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// No process is registered at the path.
    #[error("no process at {0}")]
    NotFound(NodePath),

    /// A process is already registered at the path.
    #[error("a process is already registered at {0}")]
    AlreadyRegistered(NodePath),

    /// A path was malformed.
    #[error(transparent)]
    InvalidPath(#[from] CoreError),

    /// The registration does not fit under the caller.
    #[error("{path} is not below {parent}")]
    NotAChild {
        /// Would-be parent.
        parent: NodePath,
        /// Requested path.
        path: NodePath,
    },

    /// A sandboxed call was denied.
    #[error("security violation: {caller} -> {target}: {reason}")]
    SecurityViolation {
        /// Calling path.
        caller: NodePath,
        /// Targeted path.
        target: NodePath,
        /// Attempted operation, if any.
        operation: Option<Operation>,
        /// Why it was denied.
        reason: String,
    },

    /// The target does not accept stream channels.
    #[error("{0} does not accept streams")]
    StreamsUnsupported(NodePath),

    /// A handler failed to process a message.
    #[error("handler at {path} failed: {message}")]
    Handler {
        /// Handler path.
        path: NodePath,
        /// Failure description.
        message: String,
    },

    /// A data key would escape its scope or is malformed.
    #[error("invalid data key '{key}': {reason}")]
    InvalidKey {
        /// Requested key.
        key: String,
        /// What was wrong.
        reason: String,
    },

    /// The requested data scope was not configured.
    #[error("no alternate data scope configured")]
    NoAlternateScope,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Whether this error is a sandbox denial.
    #[must_use]
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. } | Self::InvalidKey { .. })
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;
