//! Capability error types.

use thiserror::Error;

/// Errors that can occur while building capabilities and policies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// A path pattern could not be compiled.
    #[error("invalid path pattern: {pattern} - {reason}")]
    InvalidPattern {
        /// The invalid pattern.
        pattern: String,
        /// Why it's invalid.
        reason: String,
    },

    /// An operation name is not recognised.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A capability grant is malformed.
    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    /// The policy has been approved and its grants are frozen.
    #[error("policy for {package} is approved; grants are frozen")]
    AlreadyApproved {
        /// Owner of the policy.
        package: String,
    },
}

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;
