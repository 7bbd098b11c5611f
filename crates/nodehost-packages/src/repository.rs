//! Package repositories and the available-package cache.
//!
//! A repository is a URL serving a package-list document:
//!
//! ```json
//! {
//!   "name": "Nodehost Main",
//!   "packages": [
//!     {
//!       "id": "weather", "name": "Weather", "version": "1.0.0",
//!       "download_url": "https://.../weather-1.0.0.tar",
//!       "manifest": { "type": "bundle", "entry_point": "main.js" }
//!     }
//!   ]
//! }
//! ```
//!
//! A document that is not an object with a `packages` array fails the whole
//! repository. A single malformed entry is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use nodehost_config::DefaultRepositoryConfig;
use nodehost_core::PackageId;
use nodehost_events::{EventBus, EventMetadata, NodeHostEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{PackageError, PackageResult};
use crate::http;
use crate::manifest::PackageManifest;
use crate::store::{AtomicFile, run_blocking};
use crate::types::PackageInfo;

const EVENT_SOURCE: &str = "repository-manager";

/// Maximum accepted package-list document size.
const MAX_PACKAGE_LIST_BYTES: u64 = 8_388_608;

/// Current repository list schema version.
const SCHEMA_VERSION: u32 = 1;

/// A source of available packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Package-list URL.
    pub url: String,
    /// Verification key URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_url: Option<String>,
    /// Whether the repository is consulted on refresh.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Repository {
    /// Create an enabled repository, validating id and URL.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidRequest`] for a malformed id or a URL
    /// that is not `http`, `https` or `file`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> PackageResult<Self> {
        let repo = Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            key_url: None,
            enabled: true,
        };
        repo.validate()?;
        Ok(repo)
    }

    /// Set the verification key URL.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidRequest`] if the URL is malformed.
    pub fn with_key_url(mut self, key_url: impl Into<String>) -> PackageResult<Self> {
        self.key_url = Some(key_url.into());
        self.validate()?;
        Ok(self)
    }

    /// The repository seeded on first run.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidRequest`] if the configured values are
    /// invalid.
    pub fn from_config(config: &DefaultRepositoryConfig) -> PackageResult<Self> {
        let repo = Self::new(&config.id, &config.name, &config.url)?;
        match &config.key_url {
            Some(key) => repo.with_key_url(key),
            None => Ok(repo),
        }
    }

    fn validate(&self) -> PackageResult<()> {
        if !PackageId::is_valid_id(&self.id) {
            return Err(PackageError::InvalidRequest(format!(
                "invalid repository id '{}'",
                self.id
            )));
        }
        check_url(&self.url)?;
        if let Some(key) = &self.key_url {
            check_url(key)?;
        }
        Ok(())
    }
}

fn check_url(raw: &str) -> PackageResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| PackageError::InvalidRequest(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" | "file" => Ok(url),
        other => Err(PackageError::InvalidRequest(format!(
            "unsupported URL scheme '{other}' in '{raw}'"
        ))),
    }
}

/// A download locator may only point at local files when the repository
/// itself is local.
fn check_download_url(raw: &str, repository: &Repository) -> PackageResult<()> {
    let locator = check_url(raw)?;
    if locator.scheme() == "file" && !repository.url.starts_with("file:") {
        return Err(PackageError::InvalidRequest(format!(
            "local download locator '{raw}' offered by remote repository '{}'",
            repository.id
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct PackageListDocument {
    #[serde(default)]
    name: Option<String>,
    packages: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct PackageEntry {
    id: String,
    name: String,
    version: String,
    download_url: String,
    manifest: serde_json::Value,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

impl PackageEntry {
    fn into_info(self, repository: &Repository, origin: &str) -> PackageResult<PackageInfo> {
        let id = PackageId::new(self.id, self.version)?;
        if id.version().trim().is_empty() {
            return Err(PackageError::InvalidManifest {
                package: id.id().to_string(),
                message: "version must not be empty".into(),
            });
        }
        check_download_url(&self.download_url, repository)?;
        let manifest = PackageManifest::from_value(&id, self.manifest)?;
        Ok(PackageInfo {
            id,
            name: self.name,
            category: self.category,
            description: self.description,
            repository: origin.to_string(),
            download_url: self.download_url,
            size: self.size,
            manifest,
        })
    }
}

/// Parse a package-list document.
///
/// Entries are attributed to the document's own `name` when present,
/// otherwise to `repository.name`.
///
/// # Errors
///
/// Returns [`PackageError::FetchFailed`] if the document itself is
/// malformed. Malformed entries are skipped.
pub fn parse_package_list(repository: &Repository, bytes: &[u8]) -> PackageResult<Vec<PackageInfo>> {
    let doc: PackageListDocument =
        serde_json::from_slice(bytes).map_err(|e| PackageError::FetchFailed {
            repository: repository.id.clone(),
            message: format!("malformed package list: {e}"),
        })?;

    let origin = doc.name.as_deref().unwrap_or(&repository.name);
    let mut packages = Vec::with_capacity(doc.packages.len());
    for (index, value) in doc.packages.into_iter().enumerate() {
        let parsed = serde_json::from_value::<PackageEntry>(value)
            .map_err(|e| PackageError::InvalidManifest {
                package: format!("#{index}"),
                message: e.to_string(),
            })
            .and_then(|entry| entry.into_info(repository, origin));
        match parsed {
            Ok(info) => packages.push(info),
            Err(e) => {
                warn!(repository = %repository.id, entry = index, error = %e, "Skipping malformed package entry");
            },
        }
    }
    Ok(packages)
}

/// Fetches a repository's raw package-list document.
#[async_trait]
pub trait PackageListFetcher: Send + Sync + std::fmt::Debug {
    /// Fetch the document for `repository`.
    async fn fetch(&self, repository: &Repository) -> PackageResult<Vec<u8>>;
}

/// Fetches package lists over HTTP(S) or from `file://` URLs.
#[derive(Debug, Clone)]
pub struct HttpPackageListFetcher {
    client: reqwest::Client,
}

impl HttpPackageListFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> PackageResult<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
        })
    }
}

#[async_trait]
impl PackageListFetcher for HttpPackageListFetcher {
    async fn fetch(&self, repository: &Repository) -> PackageResult<Vec<u8>> {
        http::fetch_with_limit(&self.client, &repository.url, MAX_PACKAGE_LIST_BYTES)
            .await
            .map_err(|e| PackageError::FetchFailed {
                repository: repository.id.clone(),
                message: e.to_string(),
            })
    }
}

#[derive(Serialize, Deserialize)]
struct RepositoryListDocument {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    repositories: Vec<Repository>,
}

/// Repository CRUD plus the cache of available packages.
#[derive(Debug)]
pub struct RepositoryManager {
    repositories: RwLock<Vec<Repository>>,
    cache: DashMap<String, Vec<PackageInfo>>,
    file: AtomicFile,
    fetcher: Arc<dyn PackageListFetcher>,
    fetch_timeout: Duration,
    events: Option<EventBus>,
}

impl RepositoryManager {
    /// Open the repository list at `file`, seeding `default` on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing list cannot be read or parsed, or the
    /// seeded list cannot be written.
    pub async fn open(
        file: AtomicFile,
        default: Repository,
        fetcher: Arc<dyn PackageListFetcher>,
        fetch_timeout: Duration,
        events: Option<EventBus>,
    ) -> PackageResult<Self> {
        let reader = file.clone();
        let existing = run_blocking(move || reader.read()).await?;

        let repositories = match existing {
            Some(bytes) => {
                let doc: RepositoryListDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| PackageError::store(file.path(), format!("malformed: {e}")))?;
                if doc.schema_version != SCHEMA_VERSION {
                    warn!(
                        found = doc.schema_version,
                        expected = SCHEMA_VERSION,
                        "Repository list schema version mismatch, attempting best-effort load"
                    );
                }
                for repo in &doc.repositories {
                    repo.validate()?;
                }
                doc.repositories
            },
            None => {
                info!(repository = %default.id, "Seeding default repository");
                let seeded = vec![default];
                save_list(&file, &seeded).await?;
                seeded
            },
        };

        Ok(Self {
            repositories: RwLock::new(repositories),
            cache: DashMap::new(),
            file,
            fetcher,
            fetch_timeout,
            events,
        })
    }

    /// All configured repositories.
    pub async fn repositories(&self) -> Vec<Repository> {
        self.repositories.read().await.clone()
    }

    /// Look up a repository.
    pub async fn get(&self, id: &str) -> Option<Repository> {
        self.repositories
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Add a repository.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::RepositoryExists`] if the id is taken, or a
    /// persistence error.
    pub async fn add(&self, repository: Repository) -> PackageResult<()> {
        repository.validate()?;
        let mut repos = self.repositories.write().await;
        if repos.iter().any(|r| r.id == repository.id) {
            return Err(PackageError::RepositoryExists(repository.id));
        }
        let id = repository.id.clone();
        repos.push(repository);
        save_list(&self.file, &repos).await?;
        drop(repos);

        info!(repository = %id, "Added repository");
        self.publish(NodeHostEvent::RepositoryAdded {
            metadata: EventMetadata::new(EVENT_SOURCE),
            repository_id: id,
        });
        Ok(())
    }

    /// Remove a repository and its cached packages.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::RepositoryNotFound`] or a persistence error.
    pub async fn remove(&self, id: &str) -> PackageResult<Repository> {
        let mut repos = self.repositories.write().await;
        let index = repos
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| PackageError::RepositoryNotFound(id.to_string()))?;
        let removed = repos.remove(index);
        self.cache.remove(id);
        save_list(&self.file, &repos).await?;
        drop(repos);

        info!(repository = %id, "Removed repository");
        self.publish(NodeHostEvent::RepositoryRemoved {
            metadata: EventMetadata::new(EVENT_SOURCE),
            repository_id: id.to_string(),
        });
        Ok(removed)
    }

    /// Enable or disable a repository.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::RepositoryNotFound`] or a persistence error.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> PackageResult<()> {
        let mut repos = self.repositories.write().await;
        let repo = repos
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| PackageError::RepositoryNotFound(id.to_string()))?;
        repo.enabled = enabled;
        if !enabled {
            self.cache.remove(id);
        }
        save_list(&self.file, &repos).await?;
        drop(repos);

        info!(repository = %id, enabled, "Updated repository");
        self.publish(NodeHostEvent::RepositoryUpdated {
            metadata: EventMetadata::new(EVENT_SOURCE),
            repository_id: id.to_string(),
            enabled,
        });
        Ok(())
    }

    /// Refresh every enabled repository concurrently.
    ///
    /// A repository that fails to fetch, times out, or serves a malformed
    /// document contributes zero packages; its failure is logged and the
    /// call still succeeds with the other repositories' packages.
    pub async fn update_all_repositories(&self) -> Vec<PackageInfo> {
        let enabled: Vec<Repository> = self
            .repositories()
            .await
            .into_iter()
            .filter(|r| r.enabled)
            .collect();

        let results = join_all(enabled.iter().map(|repo| self.refresh_one(repo))).await;

        let mut packages = Vec::new();
        let mut failed = Vec::new();
        for (repo, result) in enabled.iter().zip(results) {
            match result {
                Ok(list) => {
                    debug!(repository = %repo.id, packages = list.len(), "Repository refreshed");
                    packages.extend(list.iter().cloned());
                    self.cache.insert(repo.id.clone(), list);
                },
                Err(e) => {
                    warn!(repository = %repo.id, error = %e, "Repository refresh failed");
                    self.cache.insert(repo.id.clone(), Vec::new());
                    failed.push(repo.id.clone());
                },
            }
        }

        info!(
            packages = packages.len(),
            failed = failed.len(),
            "Refreshed repositories"
        );
        self.publish(NodeHostEvent::RepositoriesRefreshed {
            metadata: EventMetadata::new(EVENT_SOURCE),
            package_count: packages.len(),
            failed_repositories: failed,
        });
        packages
    }

    async fn refresh_one(&self, repo: &Repository) -> PackageResult<Vec<PackageInfo>> {
        let bytes = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(repo))
            .await
            .map_err(|_| PackageError::Timeout {
                operation: format!("fetching repository {}", repo.id),
                secs: self.fetch_timeout.as_secs(),
            })??;
        parse_package_list(repo, &bytes)
    }

    /// Cached packages from enabled repositories, in repository order.
    pub async fn available_packages(&self) -> Vec<PackageInfo> {
        let repos = self.repositories.read().await;
        repos
            .iter()
            .filter(|r| r.enabled)
            .filter_map(|r| self.cache.get(&r.id).map(|list| list.value().clone()))
            .flatten()
            .collect()
    }

    /// Find a cached package by id.
    ///
    /// If `id` carries a version, only that version matches; otherwise the
    /// first repository offering the package wins.
    pub async fn find_available(&self, id: &PackageId) -> Option<PackageInfo> {
        self.available_packages().await.into_iter().find(|p| {
            p.id.id() == id.id() && (id.version().is_empty() || p.id.version() == id.version())
        })
    }

    /// Cached packages whose id, name or description contains `query`
    /// (case-insensitive).
    pub async fn search(&self, query: &str) -> Vec<PackageInfo> {
        let needle = query.to_lowercase();
        self.available_packages()
            .await
            .into_iter()
            .filter(|p| {
                p.id.id().contains(&needle)
                    || p.name.to_lowercase().contains(&needle)
                    || p
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .collect()
    }

    fn publish(&self, event: NodeHostEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

async fn save_list(file: &AtomicFile, repositories: &[Repository]) -> PackageResult<()> {
    let doc = RepositoryListDocument {
        schema_version: SCHEMA_VERSION,
        repositories: repositories.to_vec(),
    };
    let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| PackageError::Codec(e.to_string()))?;
    let file = file.clone();
    run_blocking(move || file.write(&bytes)).await
}
