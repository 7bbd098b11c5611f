//! Test fixtures for common types.

use std::path::PathBuf;

use nodehost_capabilities::{
    CapabilityManifest, NodeSecurityPolicy, Operation, PathCapability, PathPattern,
};
use nodehost_core::{PackageId, Timestamp};
use nodehost_packages::{
    ConfirmationToken, InstallationRequest, InstalledPackage, PackageInfo, PackageManifest,
    ProcessConfig,
};
use serde_json::{Value, json};

use crate::mocks::MOCK_MANIFEST_TYPE;

/// A package id at version `1.0.0`.
///
/// # Panics
///
/// Panics if `id` is not a valid package id.
#[must_use]
pub fn test_package_id(id: &str) -> PackageId {
    PackageId::new(id, "1.0.0").expect("valid test package id")
}

/// A mock-typed manifest whose entry point is the package id.
#[must_use]
pub fn test_manifest(id: &str) -> PackageManifest {
    PackageManifest::new(MOCK_MANIFEST_TYPE, id)
}

/// A package-list entry for `id` served by [`mock_loader`](crate::mock_loader).
#[must_use]
pub fn package_entry(id: &str, version: &str) -> Value {
    json!({
        "id": id,
        "name": id,
        "version": version,
        "description": format!("{id} test package"),
        "download_url": format!("https://packages.test/{id}-{version}.tar"),
        "manifest": { "type": MOCK_MANIFEST_TYPE, "entry_point": id },
    })
}

/// A package-list document named `name` holding `entries`.
///
/// # Panics
///
/// Panics if the document cannot be serialized.
#[must_use]
pub fn package_list(name: &str, entries: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({ "name": name, "packages": entries }))
        .expect("serializable package list")
}

/// An advertised package as a repository named `repository` would list it.
#[must_use]
pub fn test_package_info(id: &str, repository: &str) -> PackageInfo {
    PackageInfo {
        id: test_package_id(id),
        name: id.to_string(),
        category: None,
        description: Some(format!("{id} test package")),
        repository: repository.to_string(),
        download_url: format!("https://packages.test/{id}-1.0.0.tar"),
        size: None,
        manifest: test_manifest(id),
    }
}

/// A complete, confirmed installation request with no extra grants.
#[must_use]
pub fn install_request(info: PackageInfo) -> InstallationRequest {
    let config = ProcessConfig::standalone(&info.id);
    install_request_with(info, config, CapabilityManifest::new())
}

/// A confirmed installation request with the given namespace and grants.
#[must_use]
pub fn install_request_with(
    info: PackageInfo,
    process_config: ProcessConfig,
    capabilities: CapabilityManifest,
) -> InstallationRequest {
    InstallationRequest::new()
        .package(info)
        .process_config(process_config)
        .capabilities(capabilities)
        .confirmed(ConfirmationToken::new("test"))
}

/// A standalone installation of `manifest` with an approved policy that
/// grants message and stream access to the node's own subtrees.
///
/// # Panics
///
/// Panics if the own-subtree patterns cannot be built.
#[must_use]
pub fn test_installed(id: &str, manifest: PackageManifest) -> InstalledPackage {
    let package_id = test_package_id(id);
    let process_config = ProcessConfig::standalone(&package_id);
    let mut policy =
        NodeSecurityPolicy::new(package_id.clone(), process_config.process_id().clone());
    for path in [
        process_config.node_flow_path(&package_id),
        process_config.node_runtime_path(&package_id),
    ] {
        let pattern = PathPattern::subtree(&path).expect("valid subtree pattern");
        for operation in [Operation::Message, Operation::Stream] {
            policy
                .grant(PathCapability::new(pattern.clone(), operation, "own subtree"))
                .expect("grant before approval");
        }
    }
    policy.approve();

    InstalledPackage {
        package_id,
        name: id.to_string(),
        description: format!("{id} test package"),
        manifest,
        process_config,
        policy,
        origin_repository: "test".to_string(),
        installed_at: Timestamp::now(),
        install_path: PathBuf::from("/nonexistent"),
    }
}
