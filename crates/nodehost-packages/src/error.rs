//! Package management error types.

use std::path::PathBuf;

use nodehost_capabilities::CapabilityError;
use nodehost_core::{CoreError, PackageId};
use thiserror::Error;

/// Broad classification of a failure, used by callers to decide whether
/// to retry, report, or roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, rejected before any I/O.
    Validation,
    /// Unknown package or repository.
    NotFound,
    /// Duplicate install or repository.
    Conflict,
    /// A download, fetch, or other external call failed.
    Collaborator,
    /// Durable storage could not be read or written.
    Persistence,
    /// A capability rule was violated.
    Security,
    /// A bounded call did not finish in time.
    Timeout,
}

impl ErrorKind {
    /// Stable snake_case code, used in command replies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Collaborator => "collaborator",
            Self::Persistence => "persistence",
            Self::Security => "security",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while managing packages.
#[derive(Debug, Error)]
pub enum PackageError {
    /// An installation request was incomplete or inconsistent.
    #[error("invalid installation request: {0}")]
    InvalidRequest(String),

    /// A package manifest failed validation.
    #[error("invalid manifest for {package}: {message}")]
    InvalidManifest {
        /// Package the manifest belongs to.
        package: String,
        /// What was wrong.
        message: String,
    },

    /// An identifier or path failed validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A capability grant was malformed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// No such installed or available package.
    #[error("package not found: {0}")]
    NotFound(PackageId),

    /// No such repository.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// The package is already installed.
    #[error("package already installed: {0}")]
    AlreadyInstalled(PackageId),

    /// A repository with this id already exists.
    #[error("repository already exists: {0}")]
    RepositoryExists(String),

    /// Declared dependencies form a cycle.
    #[error("dependency cycle among: {}", members.join(", "))]
    DependencyCycle {
        /// Packages participating in (or blocked by) the cycle.
        members: Vec<String>,
    },

    /// An artifact download failed.
    #[error("download of {locator} failed: {message}")]
    DownloadFailed {
        /// Locator that was requested.
        locator: String,
        /// Underlying failure.
        message: String,
    },

    /// A download exceeded the configured size limit.
    #[error("download is {size} bytes, exceeding the {limit} byte limit")]
    PackageTooLarge {
        /// Observed size so far.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// A repository package list could not be fetched or parsed.
    #[error("repository {repository} failed: {message}")]
    FetchFailed {
        /// Repository id.
        repository: String,
        /// Underlying failure.
        message: String,
    },

    /// A persisted store could not be read or written.
    #[error("store error at {path}: {message}")]
    StoreError {
        /// Store file.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },

    /// A persisted record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),

    /// A bounded operation timed out.
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// What was being attempted.
        operation: String,
        /// The bound that was exceeded.
        secs: u64,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackageError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidManifest { .. }
            | Self::Core(_)
            | Self::DependencyCycle { .. }
            | Self::PackageTooLarge { .. } => ErrorKind::Validation,
            Self::Capability(CapabilityError::AlreadyApproved { .. }) => ErrorKind::Security,
            Self::Capability(_) => ErrorKind::Validation,
            Self::NotFound(_) | Self::RepositoryNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyInstalled(_) | Self::RepositoryExists(_) => ErrorKind::Conflict,
            Self::DownloadFailed { .. } | Self::FetchFailed { .. } => ErrorKind::Collaborator,
            Self::StoreError { .. } | Self::Codec(_) | Self::Io(_) => ErrorKind::Persistence,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub(crate) fn store(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::StoreError {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;
