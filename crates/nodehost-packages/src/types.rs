//! Package and namespace records.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use nodehost_capabilities::NodeSecurityPolicy;
use nodehost_core::{NodePath, PackageId, ProcessId, Timestamp, layout};
use serde::{Deserialize, Serialize};

use crate::error::PackageError;
use crate::manifest::PackageManifest;

/// How a package relates to the process namespace it is installed into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceMode {
    /// The package owns its namespace.
    #[default]
    Standalone,
    /// The namespace is shared with other packages.
    Shared,
    /// The package leads a cluster of packages in the namespace.
    ClusterLeader,
    /// The package joins a namespace led by another package.
    ClusterMember,
}

impl InheritanceMode {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Shared => "shared",
            Self::ClusterLeader => "cluster_leader",
            Self::ClusterMember => "cluster_member",
        }
    }
}

impl fmt::Display for InheritanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InheritanceMode {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "standalone" => Ok(Self::Standalone),
            "shared" => Ok(Self::Shared),
            "cluster_leader" => Ok(Self::ClusterLeader),
            "cluster_member" => Ok(Self::ClusterMember),
            other => Err(PackageError::InvalidRequest(format!(
                "unknown inheritance mode '{other}'"
            ))),
        }
    }
}

/// The process namespace a package is installed into.
///
/// Paths are derived from the process id and checked again on
/// deserialization, so a hand-edited registry cannot point a node at
/// another namespace's paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProcessConfigRecord")]
pub struct ProcessConfig {
    process_id: ProcessId,
    data_root_path: NodePath,
    flow_base_path: NodePath,
    inheritance_mode: InheritanceMode,
}

#[derive(Deserialize)]
struct ProcessConfigRecord {
    process_id: ProcessId,
    data_root_path: NodePath,
    flow_base_path: NodePath,
    #[serde(default)]
    inheritance_mode: InheritanceMode,
}

impl TryFrom<ProcessConfigRecord> for ProcessConfig {
    type Error = String;

    fn try_from(record: ProcessConfigRecord) -> Result<Self, Self::Error> {
        let config = Self::new(record.process_id, record.inheritance_mode);
        if config.data_root_path != record.data_root_path
            || config.flow_base_path != record.flow_base_path
        {
            return Err(format!(
                "paths for process '{}' do not match its derived layout",
                config.process_id
            ));
        }
        Ok(config)
    }
}

impl ProcessConfig {
    /// Create a config, deriving paths from `process_id`.
    #[must_use]
    pub fn new(process_id: ProcessId, inheritance_mode: InheritanceMode) -> Self {
        Self {
            data_root_path: layout::data_root(&process_id),
            flow_base_path: layout::flow_base(&process_id),
            process_id,
            inheritance_mode,
        }
    }

    /// A standalone namespace named after the package.
    #[must_use]
    pub fn standalone(package: &PackageId) -> Self {
        Self::new(ProcessId::for_package(package), InheritanceMode::Standalone)
    }

    /// Namespace key.
    #[must_use]
    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    /// Root of the namespace's user-visible data.
    #[must_use]
    pub fn data_root_path(&self) -> &NodePath {
        &self.data_root_path
    }

    /// Root of the namespace's process tree.
    #[must_use]
    pub fn flow_base_path(&self) -> &NodePath {
        &self.flow_base_path
    }

    /// How the package relates to the namespace.
    #[must_use]
    pub fn inheritance_mode(&self) -> InheritanceMode {
        self.inheritance_mode
    }

    /// Flow path of `package`'s node in this namespace.
    #[must_use]
    pub fn node_flow_path(&self, package: &PackageId) -> NodePath {
        layout::node_flow_path(&self.process_id, package)
    }

    /// Runtime data path of `package`'s node in this namespace.
    #[must_use]
    pub fn node_runtime_path(&self, package: &PackageId) -> NodePath {
        layout::node_runtime_path(&self.process_id, package)
    }

    /// User data path of `package`'s node in this namespace.
    #[must_use]
    pub fn node_data_path(&self, package: &PackageId) -> NodePath {
        layout::node_data_path(&self.process_id, package)
    }
}

/// A package advertised by a repository, not yet installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Identity, including version.
    pub id: PackageId,
    /// Display name.
    pub name: String,
    /// Category, if the repository gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Description, if the repository gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the repository that advertised it.
    pub repository: String,
    /// Where to download the artifact.
    pub download_url: String,
    /// Artifact size in bytes, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Validated manifest.
    pub manifest: PackageManifest,
}

impl PackageInfo {
    /// Advertised version.
    #[must_use]
    pub fn version(&self) -> &str {
        self.id.version()
    }
}

/// A committed installation.
///
/// Built once by the installer and never mutated; a reinstall produces a
/// new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Identity, including the installed version.
    pub package_id: PackageId,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Validated manifest.
    pub manifest: PackageManifest,
    /// Namespace the package was installed into.
    pub process_config: ProcessConfig,
    /// Approved capability policy.
    pub policy: NodeSecurityPolicy,
    /// Repository the package came from.
    pub origin_repository: String,
    /// When it was installed.
    pub installed_at: Timestamp,
    /// Directory holding the stored artifact.
    pub install_path: PathBuf,
}

impl InstalledPackage {
    /// Flow path of this package's node.
    #[must_use]
    pub fn flow_path(&self) -> NodePath {
        self.process_config.node_flow_path(&self.package_id)
    }

    /// Runtime data path of this package's node.
    #[must_use]
    pub fn runtime_path(&self) -> NodePath {
        self.process_config.node_runtime_path(&self.package_id)
    }

    /// User data path of this package's node.
    #[must_use]
    pub fn data_path(&self) -> NodePath {
        self.process_config.node_data_path(&self.package_id)
    }
}
