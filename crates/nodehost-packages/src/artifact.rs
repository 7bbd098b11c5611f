//! Content-addressed artifact storage.
//!
//! Layout: `{root}/{package_id}/{blake3-hex}/artifact`. The directory
//! holding the artifact is the package's install path.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nodehost_core::PackageId;
use tracing::{debug, info};

use crate::error::{PackageError, PackageResult};
use crate::store::run_blocking;

/// File name of the stored artifact inside its install directory.
pub const ARTIFACT_FILE_NAME: &str = "artifact";

/// Durable storage for downloaded package artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Store `bytes` for `package`, returning the install directory.
    async fn store(&self, package: &PackageId, bytes: Vec<u8>) -> PackageResult<PathBuf>;

    /// Remove one install directory previously returned by `store`.
    async fn discard(&self, install_path: &Path) -> PackageResult<()>;

    /// Remove every stored artifact for `package`. Returns whether anything
    /// was removed.
    async fn remove(&self, package: &PackageId) -> PackageResult<bool>;
}

/// Artifact store rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Store artifacts under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, package: &PackageId) -> PathBuf {
        self.root.join(package.id())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, package: &PackageId, bytes: Vec<u8>) -> PackageResult<PathBuf> {
        let hash = blake3::hash(&bytes).to_hex().to_string();
        let dir = self.package_dir(package).join(&hash);
        let package_id = package.clone();

        let install_path = run_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            let target = dir.join(ARTIFACT_FILE_NAME);
            if target.exists() {
                debug!(package_id = %package_id, "Artifact already stored");
                return Ok(dir);
            }
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target)
                .map_err(|e| PackageError::store(&target, format!("failed to persist artifact: {e}")))?;
            Ok(dir)
        })
        .await?;

        info!(package_id = %package, hash = %hash, "Stored artifact");
        Ok(install_path)
    }

    async fn discard(&self, install_path: &Path) -> PackageResult<()> {
        if !install_path.starts_with(&self.root) {
            return Err(PackageError::store(
                install_path,
                "refusing to remove a path outside the artifact store",
            ));
        }
        let path = install_path.to_path_buf();
        run_blocking(move || match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await?;
        debug!(path = %install_path.display(), "Discarded artifact");
        Ok(())
    }

    async fn remove(&self, package: &PackageId) -> PackageResult<bool> {
        let dir = self.package_dir(package);
        let removed = run_blocking(move || match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await?;
        if removed {
            info!(package_id = %package, "Removed stored artifacts");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let pkg = PackageId::new("weather", "1.0.0").unwrap();

        let first = store.store(&pkg, b"v1".to_vec()).await.unwrap();
        let again = store.store(&pkg, b"v1".to_vec()).await.unwrap();
        let second = store.store(&pkg, b"v2".to_vec()).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, second);
        assert!(first.starts_with(dir.path().join("weather")));
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            blake3::hash(b"v1").to_hex().as_str()
        );
        assert_eq!(std::fs::read(first.join(ARTIFACT_FILE_NAME)).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn discard_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let pkg = PackageId::new("weather", "1.0.0").unwrap();

        let one = store.store(&pkg, b"one".to_vec()).await.unwrap();
        let two = store.store(&pkg, b"two".to_vec()).await.unwrap();
        store.discard(&one).await.unwrap();
        assert!(!one.exists());
        assert!(two.exists());

        assert!(store.remove(&pkg).await.unwrap());
        assert!(!two.exists());
        assert!(!store.remove(&pkg).await.unwrap());
    }

    #[tokio::test]
    async fn discard_refuses_foreign_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("packages"));
        assert!(store.discard(dir.path()).await.is_err());
    }
}
