//! Scoped storage for loaded nodes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use nodehost_core::NodePath;
use tracing::debug;

use crate::error::{ProcessError, ProcessResult};

/// Which of a node's two storage areas a call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataScope {
    /// The node's system runtime area.
    Primary,
    /// The user-visible data area.
    Alternate,
}

/// Key/value file storage confined to a node's paths.
///
/// Keys are relative, `/`-separated. A key that would leave its scope is
/// rejected before any I/O.
#[async_trait]
pub trait DataInterface: Send + Sync + std::fmt::Debug {
    /// The primary scope's logical path.
    fn primary(&self) -> &NodePath;

    /// The alternate scope's logical path, if one was configured.
    fn alternate(&self) -> Option<&NodePath>;

    /// Read `key`, or `None` if it does not exist.
    async fn read(&self, scope: DataScope, key: &str) -> ProcessResult<Option<Vec<u8>>>;

    /// Write `key`, creating parent directories as needed.
    async fn write(&self, scope: DataScope, key: &str, contents: &[u8]) -> ProcessResult<()>;

    /// Delete `key`. Returns whether it existed.
    async fn delete(&self, scope: DataScope, key: &str) -> ProcessResult<bool>;

    /// Every key under `prefix` (empty for the whole scope), sorted.
    async fn list(&self, scope: DataScope, prefix: &str) -> ProcessResult<Vec<String>>;
}

/// [`DataInterface`] over a directory tree. A logical path such as
/// `/data/home/weather` is stored at `{root}/data/home/weather`.
#[derive(Debug, Clone)]
pub struct FsDataInterface {
    root: PathBuf,
    primary: NodePath,
    alternate: Option<NodePath>,
}

impl FsDataInterface {
    /// Scope storage under `root` to `primary` and optionally `alternate`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, primary: NodePath, alternate: Option<NodePath>) -> Self {
        Self {
            root: root.into(),
            primary,
            alternate,
        }
    }

    fn scope_dir(&self, scope: DataScope) -> ProcessResult<PathBuf> {
        let path = match scope {
            DataScope::Primary => &self.primary,
            DataScope::Alternate => self.alternate.as_ref().ok_or(ProcessError::NoAlternateScope)?,
        };
        Ok(path.segments().fold(self.root.clone(), |dir, s| dir.join(s)))
    }

    fn resolve(&self, scope: DataScope, key: &str) -> ProcessResult<PathBuf> {
        let base = self.scope_dir(scope)?;
        resolve_key(&base, key)
    }
}

/// Lexically join `key` onto `base`, refusing anything that climbs out.
fn resolve_key(base: &Path, key: &str) -> ProcessResult<PathBuf> {
    let invalid = |reason: &str| ProcessError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.contains('\0') {
        return Err(invalid("contains NUL"));
    }
    let requested = Path::new(key);
    if requested.is_absolute() {
        return Err(invalid("absolute keys are not allowed"));
    }

    let mut resolved = base.to_path_buf();
    for component in requested.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(invalid("prefix or root components are not allowed"));
            },
            Component::CurDir => {},
            Component::ParentDir => {
                if resolved == base {
                    return Err(invalid("traverses above its scope"));
                }
                resolved.pop();
            },
            Component::Normal(part) => resolved.push(part),
        }
    }
    Ok(resolved)
}

#[async_trait]
impl DataInterface for FsDataInterface {
    fn primary(&self) -> &NodePath {
        &self.primary
    }

    fn alternate(&self) -> Option<&NodePath> {
        self.alternate.as_ref()
    }

    async fn read(&self, scope: DataScope, key: &str) -> ProcessResult<Option<Vec<u8>>> {
        let path = self.resolve(scope, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, scope: DataScope, key: &str, contents: &[u8]) -> ProcessResult<()> {
        let base = self.scope_dir(scope)?;
        let path = resolve_key(&base, key)?;
        if path == base {
            return Err(ProcessError::InvalidKey {
                key: key.to_string(),
                reason: "names the scope itself".into(),
            });
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        debug!(path = %path.display(), bytes = contents.len(), "Wrote node data");
        Ok(())
    }

    async fn delete(&self, scope: DataScope, key: &str) -> ProcessResult<bool> {
        let path = self.resolve(scope, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, scope: DataScope, prefix: &str) -> ProcessResult<Vec<String>> {
        let base = self.scope_dir(scope)?;
        let start = resolve_key(&base, prefix)?;

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&base) {
                    let key: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    keys.push(key.join("/"));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    fn scoped(dir: &tempfile::TempDir) -> FsDataInterface {
        FsDataInterface::new(
            dir.path(),
            p("/system/runtime/weather/weather"),
            Some(p("/data/weather/weather")),
        )
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let data = scoped(&dir);

        assert_eq!(data.read(DataScope::Primary, "state.json").await.unwrap(), None);
        data.write(DataScope::Primary, "cache/state.json", b"{}").await.unwrap();
        assert_eq!(
            data.read(DataScope::Primary, "cache/state.json").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(
            dir.path()
                .join("system/runtime/weather/weather/cache/state.json")
                .exists()
        );

        assert!(data.delete(DataScope::Primary, "cache/state.json").await.unwrap());
        assert!(!data.delete(DataScope::Primary, "cache/state.json").await.unwrap());
    }

    #[tokio::test]
    async fn scopes_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let data = scoped(&dir);
        data.write(DataScope::Alternate, "notes.txt", b"user").await.unwrap();
        data.write(DataScope::Primary, "a/b.bin", b"1").await.unwrap();
        data.write(DataScope::Primary, "c.bin", b"2").await.unwrap();

        assert_eq!(
            data.list(DataScope::Primary, "").await.unwrap(),
            vec!["a/b.bin".to_string(), "c.bin".to_string()]
        );
        assert_eq!(data.list(DataScope::Primary, "a").await.unwrap(), vec!["a/b.bin".to_string()]);
        assert_eq!(data.list(DataScope::Alternate, "").await.unwrap(), vec!["notes.txt".to_string()]);
        assert!(data.read(DataScope::Primary, "notes.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn escaping_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = scoped(&dir);
        for key in ["../other/secret", "/etc/passwd", "a/../../x", "bad\0key"] {
            let err = data.write(DataScope::Primary, key, b"x").await.unwrap_err();
            assert!(err.is_security_violation(), "{key}");
        }
        assert!(data.write(DataScope::Primary, "", b"x").await.is_err());
        assert!(data.write(DataScope::Primary, "a/./b/../c", b"x").await.is_ok());
        assert!(data.read(DataScope::Primary, "a/c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_alternate_scope() {
        let dir = tempfile::tempdir().unwrap();
        let data = FsDataInterface::new(dir.path(), p("/system/runtime/x/x"), None);
        assert!(data.alternate().is_none());
        assert!(matches!(
            data.read(DataScope::Alternate, "k").await,
            Err(ProcessError::NoAlternateScope)
        ));
    }
}
