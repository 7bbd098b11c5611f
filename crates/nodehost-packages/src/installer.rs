//! Installation executor.
//!
//! Turns an approved [`InstallationRequest`] into an [`InstalledPackage`]
//! value. Committing that value to the registry is the caller's job, so a
//! failed build and a failed commit are reported separately.

use std::sync::Arc;
use std::time::Duration;

use nodehost_capabilities::{
    CapabilityManifest, NodeSecurityPolicy, Operation, PathCapability, PathPattern,
};
use nodehost_core::Timestamp;
use tracing::{info, warn};

use crate::artifact::ArtifactStore;
use crate::download::ArtifactDownloader;
use crate::error::{PackageError, PackageResult};
use crate::types::{InstalledPackage, PackageInfo, ProcessConfig};

/// Evidence that the user confirmed the install upstream (approval UI,
/// credential check, or an explicit CLI flag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    method: String,
    confirmed_at: Timestamp,
}

impl ConfirmationToken {
    /// Record a confirmation obtained via `method`.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            confirmed_at: Timestamp::now(),
        }
    }

    /// How the confirmation was obtained.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// When it was obtained.
    #[must_use]
    pub fn confirmed_at(&self) -> Timestamp {
        self.confirmed_at
    }
}

/// Everything needed to install one package.
#[derive(Debug, Clone, Default)]
pub struct InstallationRequest {
    /// Package to install.
    pub package: Option<PackageInfo>,
    /// Namespace to install it into.
    pub process_config: Option<ProcessConfig>,
    /// Grants the user approved (beyond the defaults).
    pub capabilities: Option<CapabilityManifest>,
    /// Proof of upstream confirmation.
    pub confirmation: Option<ConfirmationToken>,
}

impl InstallationRequest {
    /// Start an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the package.
    #[must_use]
    pub fn package(mut self, package: PackageInfo) -> Self {
        self.package = Some(package);
        self
    }

    /// Set the process namespace.
    #[must_use]
    pub fn process_config(mut self, config: ProcessConfig) -> Self {
        self.process_config = Some(config);
        self
    }

    /// Set the approved capabilities.
    #[must_use]
    pub fn capabilities(mut self, manifest: CapabilityManifest) -> Self {
        self.capabilities = Some(manifest);
        self
    }

    /// Attach the confirmation.
    #[must_use]
    pub fn confirmed(mut self, token: ConfirmationToken) -> Self {
        self.confirmation = Some(token);
        self
    }

    fn validate(self) -> PackageResult<ValidatedRequest> {
        let missing = |field: &str| PackageError::InvalidRequest(format!("missing {field}"));
        let package = self.package.ok_or_else(|| missing("package"))?;
        let process_config = self.process_config.ok_or_else(|| missing("process config"))?;
        let capabilities = self.capabilities.ok_or_else(|| missing("capability manifest"))?;
        let confirmation = self.confirmation.ok_or_else(|| missing("confirmation"))?;

        package.manifest.validate(&package.id)?;
        capabilities.validate()?;
        Ok(ValidatedRequest {
            package,
            process_config,
            capabilities,
            confirmation,
        })
    }
}

struct ValidatedRequest {
    package: PackageInfo,
    process_config: ProcessConfig,
    capabilities: CapabilityManifest,
    confirmation: ConfirmationToken,
}

/// Downloads, stores, and assembles installations.
#[derive(Debug, Clone)]
pub struct InstallationExecutor {
    downloader: Arc<dyn ArtifactDownloader>,
    artifacts: Arc<dyn ArtifactStore>,
    download_timeout: Duration,
}

impl InstallationExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(
        downloader: Arc<dyn ArtifactDownloader>,
        artifacts: Arc<dyn ArtifactStore>,
        download_timeout: Duration,
    ) -> Self {
        Self {
            downloader,
            artifacts,
            download_timeout,
        }
    }

    /// Build an [`InstalledPackage`] from `request`.
    ///
    /// Steps: validate the request (no I/O before this passes), download
    /// and store the artifact, build and approve the policy, assemble the
    /// record. A failure after the artifact is stored discards it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an incomplete request, a collaborator
    /// or timeout error if the download fails, or a persistence error if
    /// the artifact cannot be stored.
    pub async fn execute_installation(
        &self,
        request: InstallationRequest,
    ) -> PackageResult<InstalledPackage> {
        let ValidatedRequest {
            package,
            process_config,
            capabilities,
            confirmation,
        } = request.validate()?;

        let bytes = tokio::time::timeout(
            self.download_timeout,
            self.downloader.download(&package.download_url),
        )
        .await
        .map_err(|_| PackageError::Timeout {
            operation: format!("downloading {}", package.id),
            secs: self.download_timeout.as_secs(),
        })??;

        let install_path = self.artifacts.store(&package.id, bytes).await?;

        let policy = match build_policy(&package, &process_config, &capabilities) {
            Ok(policy) => policy,
            Err(e) => {
                if let Err(cleanup) = self.artifacts.discard(&install_path).await {
                    warn!(package_id = %package.id, error = %cleanup, "Failed to discard artifact after policy error");
                }
                return Err(e);
            },
        };

        info!(
            package_id = %package.id,
            process_id = %process_config.process_id(),
            grants = policy.capabilities().len(),
            confirmed_via = confirmation.method(),
            "Built installation"
        );

        Ok(InstalledPackage {
            name: package.name,
            description: package.description.unwrap_or_default(),
            manifest: package.manifest,
            policy,
            origin_repository: package.repository,
            installed_at: Timestamp::now(),
            install_path,
            process_config,
            package_id: package.id,
        })
    }
}

/// The approved grants plus message/stream access to the node's own flow
/// and runtime subtrees.
fn build_policy(
    package: &PackageInfo,
    process_config: &ProcessConfig,
    capabilities: &CapabilityManifest,
) -> PackageResult<NodeSecurityPolicy> {
    let mut policy = NodeSecurityPolicy::from_manifest(
        package.id.clone(),
        process_config.process_id().clone(),
        capabilities,
    )?;

    let own = [
        (process_config.node_flow_path(&package.id), "own flow subtree"),
        (process_config.node_runtime_path(&package.id), "own runtime subtree"),
    ];
    for (path, reason) in own {
        let pattern = PathPattern::subtree(&path)?;
        for operation in [Operation::Message, Operation::Stream] {
            policy.grant(PathCapability::new(pattern.clone(), operation, reason))?;
        }
    }

    policy.approve();
    Ok(policy)
}
