//! Shared HTTP and `file://` fetching with size limits.

use std::time::Duration;

use futures::StreamExt;
use tracing::debug;
use url::Url;

use crate::error::{PackageError, PackageResult};

const USER_AGENT: &str = concat!("nodehost/", env!("CARGO_PKG_VERSION"));

/// Build a client with a user agent, bounded redirects, and a request timeout.
pub(crate) fn build_client(timeout: Duration) -> PackageResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(timeout)
        .build()
        .map_err(|e| PackageError::DownloadFailed {
            locator: "<client>".to_string(),
            message: format!("failed to create HTTP client: {e}"),
        })
}

/// Fetch `locator` (http, https or file) into memory, failing past `max_size`.
///
/// Errors are reported as [`PackageError::DownloadFailed`] or
/// [`PackageError::PackageTooLarge`]; callers rewrap them as needed.
pub(crate) async fn fetch_with_limit(
    client: &reqwest::Client,
    locator: &str,
    max_size: u64,
) -> PackageResult<Vec<u8>> {
    let failed = |message: String| PackageError::DownloadFailed {
        locator: locator.to_string(),
        message,
    };

    let url = Url::parse(locator).map_err(|e| failed(format!("invalid URL: {e}")))?;
    match url.scheme() {
        "file" => read_local(&url, max_size).await.map_err(|e| match e {
            PackageError::Io(io) => failed(io.to_string()),
            other => other,
        }),
        "http" | "https" => {
            debug!(url = %url, "Fetching");
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| failed(e.to_string()))?;

            if !response.status().is_success() {
                return Err(failed(format!("server returned {}", response.status())));
            }

            if let Some(len) = response.content_length()
                && len > max_size
            {
                return Err(PackageError::PackageTooLarge {
                    size: len,
                    limit: max_size,
                });
            }

            download_with_limit(response, max_size)
                .await
                .map_err(|e| match e {
                    PackageError::Io(io) => failed(io.to_string()),
                    other => other,
                })
        },
        other => Err(failed(format!("unsupported scheme '{other}'"))),
    }
}

async fn read_local(url: &Url, max_size: u64) -> PackageResult<Vec<u8>> {
    let path = url
        .to_file_path()
        .map_err(|()| std::io::Error::other(format!("not a local file path: {url}")))?;
    let metadata = tokio::fs::metadata(&path).await?;
    if metadata.len() > max_size {
        return Err(PackageError::PackageTooLarge {
            size: metadata.len(),
            limit: max_size,
        });
    }
    Ok(tokio::fs::read(&path).await?)
}

/// Stream a response body, checking the size after every chunk.
async fn download_with_limit(response: reqwest::Response, max_size: u64) -> PackageResult<Vec<u8>> {
    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| std::io::Error::other(format!("body error: {e}")))?;
        bytes.extend_from_slice(&chunk);
        let current_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current_size > max_size {
            return Err(PackageError::PackageTooLarge {
                size: current_size,
                limit: max_size,
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        build_client(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn reads_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"payload").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let bytes = fetch_with_limit(&client(), url.as_str(), 1024).await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn enforces_limit_on_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let url = Url::from_file_path(&path).unwrap();

        assert!(matches!(
            fetch_with_limit(&client(), url.as_str(), 16).await,
            Err(PackageError::PackageTooLarge { size: 64, limit: 16 })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_download_failure() {
        let err = fetch_with_limit(&client(), "file:///nonexistent/nodehost/x", 16)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn rejects_unsupported_schemes() {
        for locator in ["ftp://example.com/x", "not a url"] {
            assert!(matches!(
                fetch_with_limit(&client(), locator, 16).await,
                Err(PackageError::DownloadFailed { .. })
            ));
        }
    }
}
