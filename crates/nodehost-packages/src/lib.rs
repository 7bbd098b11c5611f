//! Package management for the nodehost plugin runtime.
//!
//! Provides everything between "a repository advertises a package" and
//! "an installed package is ready to be loaded":
//!
//! - [`PackageManifest`], [`PackageInfo`], [`InstalledPackage`], [`ProcessConfig`]:
//!   the package data model
//! - [`InstallationRegistry`]: the persisted map of installed packages
//! - [`RepositoryManager`]: repository CRUD and package-list refresh
//! - [`InstallationExecutor`]: download, policy approval, record assembly
//! - [`PackageManager`]: the facade that commits installs and uninstalls
//! - [`load_order`]: dependency ordering for autostart
//!
//! # Persistence
//!
//! The registry and the repository list are each written as a whole on
//! every mutation, atomically (temp file, fsync, rename) and under an
//! advisory lock on a `.lk` sibling. A missing file is treated as an empty
//! store and created on first use.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod artifact;
pub mod codec;
pub mod download;
pub mod error;
mod http;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod order;
pub mod registry;
pub mod repository;
pub mod store;
pub mod types;

pub use artifact::{ARTIFACT_FILE_NAME, ArtifactStore, FsArtifactStore};
pub use codec::{InstalledState, JsonRecordCodec, RecordCodec};
pub use download::{ArtifactDownloader, HttpArtifactDownloader};
pub use error::{ErrorKind, PackageError, PackageResult};
pub use installer::{ConfirmationToken, InstallationExecutor, InstallationRequest};
pub use manager::PackageManager;
pub use manifest::PackageManifest;
pub use order::load_order;
pub use registry::InstallationRegistry;
pub use repository::{
    HttpPackageListFetcher, PackageListFetcher, Repository, RepositoryManager, parse_package_list,
};
pub use store::{AtomicFile, FileRegistryStore, RegistryStore};
pub use types::{InheritanceMode, InstalledPackage, PackageInfo, ProcessConfig};
