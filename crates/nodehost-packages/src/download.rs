//! Artifact downloads.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::PackageResult;
use crate::http;

/// Retrieves a package artifact given its download locator.
#[async_trait]
pub trait ArtifactDownloader: Send + Sync + std::fmt::Debug {
    /// Download the artifact at `locator`.
    async fn download(&self, locator: &str) -> PackageResult<Vec<u8>>;
}

/// Downloads artifacts over HTTP(S) or from `file://` locators, streaming
/// the body and failing once it exceeds the size limit.
#[derive(Debug, Clone)]
pub struct HttpArtifactDownloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpArtifactDownloader {
    /// Create a downloader.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, max_bytes: u64) -> PackageResult<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
            max_bytes,
        })
    }

    /// Configured size limit.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[async_trait]
impl ArtifactDownloader for HttpArtifactDownloader {
    async fn download(&self, locator: &str) -> PackageResult<Vec<u8>> {
        let bytes = http::fetch_with_limit(&self.client, locator, self.max_bytes).await?;
        info!(locator, bytes = bytes.len(), "Downloaded artifact");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PackageError;

    #[tokio::test]
    async fn downloads_local_artifact_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.tar");
        std::fs::write(&path, b"artifact-bytes").unwrap();
        let locator = url::Url::from_file_path(&path).unwrap().to_string();

        let downloader = HttpArtifactDownloader::new(Duration::from_secs(5), 1024).unwrap();
        assert_eq!(downloader.download(&locator).await.unwrap(), b"artifact-bytes");

        let tight = HttpArtifactDownloader::new(Duration::from_secs(5), 4).unwrap();
        assert!(matches!(
            tight.download(&locator).await,
            Err(PackageError::PackageTooLarge { .. })
        ));
    }
}
