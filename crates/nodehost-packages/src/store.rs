//! Durable single-file stores.
//!
//! Writes go to a temp file in the target directory, are fsynced, then
//! renamed over the target. Readers and writers coordinate through an
//! advisory `fs2` lock on a `.lk` sibling so concurrent processes never
//! observe a half-written store.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, info};

use crate::codec::{InstalledState, JsonRecordCodec, RecordCodec};
use crate::error::{PackageError, PackageResult};

/// Maximum size of a store file accepted on read.
const MAX_STORE_BYTES: u64 = 67_108_864;

/// A file replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct AtomicFile {
    path: PathBuf,
}

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

impl AtomicFile {
    /// Wrap `path`. Nothing is touched on disk until the first read or write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::StoreError`] if the file exists but cannot be
    /// read or exceeds the size limit.
    pub fn read(&self) -> PackageResult<Option<Vec<u8>>> {
        let _guard = self.lock(LockMode::Shared)?;

        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PackageError::store(&self.path, format!("failed to stat: {e}"))),
        };
        if metadata.len() > MAX_STORE_BYTES {
            return Err(PackageError::store(
                &self.path,
                format!(
                    "file is {} bytes, exceeding the {MAX_STORE_BYTES} byte limit",
                    metadata.len()
                ),
            ));
        }

        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PackageError::store(&self.path, format!("failed to read: {e}"))),
        }
    }

    /// Atomically replace the file with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::StoreError`] if any step of the write fails.
    /// The previous contents are left intact in that case.
    pub fn write(&self, bytes: &[u8]) -> PackageResult<()> {
        let parent = self.parent();
        std::fs::create_dir_all(parent).map_err(|e| {
            PackageError::store(&self.path, format!("failed to create parent directory: {e}"))
        })?;

        let _guard = self.lock(LockMode::Exclusive)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            PackageError::store(&self.path, format!("failed to create temp file: {e}"))
        })?;
        tmp.write_all(bytes)
            .map_err(|e| PackageError::store(&self.path, format!("failed to write temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| PackageError::store(&self.path, format!("failed to sync temp file: {e}")))?;
        tmp.persist(&self.path).map_err(|e| {
            PackageError::store(&self.path, format!("failed to replace store file: {e}"))
        })?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Wrote store file");
        Ok(())
    }

    fn parent(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Lock the `.lk` sibling. Shared locks are skipped when no writer has
    /// ever created the lock file.
    fn lock(&self, mode: LockMode) -> PackageResult<Option<File>> {
        let lock_path = self.path.with_extension("lk");
        let file = match mode {
            LockMode::Shared => match File::open(&lock_path) {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(PackageError::store(
                        &self.path,
                        format!("failed to open lock file: {e}"),
                    ));
                },
            },
            LockMode::Exclusive => std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)
                .map_err(|e| {
                    PackageError::store(&self.path, format!("failed to open lock file: {e}"))
                })?,
        };

        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| PackageError::store(&self.path, format!("failed to lock: {e}")))?;
        Ok(Some(file))
    }
}

/// Durable backing for the installation registry.
#[async_trait]
pub trait RegistryStore: Send + Sync + std::fmt::Debug {
    /// Load the persisted state, creating an empty store if none exists.
    async fn load_or_create(&self) -> PackageResult<InstalledState>;

    /// Persist the full state.
    async fn save(&self, state: &InstalledState) -> PackageResult<()>;
}

/// Registry store backed by one atomically replaced file.
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    file: AtomicFile,
    codec: Arc<dyn RecordCodec>,
}

impl FileRegistryStore {
    /// A JSON store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_codec(path, Arc::new(JsonRecordCodec))
    }

    /// A store at `path` using `codec`.
    #[must_use]
    pub fn with_codec(path: impl Into<PathBuf>, codec: Arc<dyn RecordCodec>) -> Self {
        Self {
            file: AtomicFile::new(path),
            codec,
        }
    }

    /// The store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn load_or_create(&self) -> PackageResult<InstalledState> {
        let file = self.file.clone();
        let read = run_blocking(move || file.read()).await?;
        if let Some(bytes) = read {
            return self.codec.decode(&bytes);
        }

        info!(path = %self.path().display(), "No installation registry found, creating empty store");
        let empty = InstalledState::new();
        self.save(&empty).await?;
        Ok(empty)
    }

    async fn save(&self, state: &InstalledState) -> PackageResult<()> {
        let bytes = self.codec.encode(state)?;
        let file = self.file.clone();
        run_blocking(move || file.write(&bytes)).await
    }
}

/// Run blocking filesystem work off the async worker threads.
pub(crate) async fn run_blocking<T, F>(f: F) -> PackageResult<T>
where
    F: FnOnce() -> PackageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PackageError::Io(std::io::Error::other(format!("blocking task failed: {e}"))))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = AtomicFile::new(dir.path().join("registry.json"));
        assert!(file.read().unwrap().is_none());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = AtomicFile::new(dir.path().join("nested/registry.json"));
        file.write(b"{\"a\":1}").unwrap();
        assert_eq!(file.read().unwrap().unwrap(), b"{\"a\":1}");
        file.write(b"{}").unwrap();
        assert_eq!(file.read().unwrap().unwrap(), b"{}");
        assert!(dir.path().join("nested/registry.lk").exists());
    }

    #[tokio::test]
    async fn first_run_creates_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::new(dir.path().join("registry.json"));
        let state = store.load_or_create().await.unwrap();
        assert!(state.is_empty());
        assert!(store.path().exists());

        let again = store.load_or_create().await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn corrupt_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, b"{ truncated").unwrap();
        let store = FileRegistryStore::new(&path);
        let err = store.load_or_create().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Persistence);
    }
}
