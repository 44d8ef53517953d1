//! Local-disk storage backend.
//!
//! Every key maps to a file beneath the backend's root directory. Writes go
//! to a hidden temporary sibling first and are renamed into place, so a
//! crashed or failed write never leaves a truncated file at the final path.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::{StorageBackend, StorageError};

/// Suffix of in-flight temporary files; these are never listed.
const TMP_SUFFIX: &str = ".cz-tmp";

/// A storage backend that keeps files under a local directory.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the directory cannot be created or
    /// is not a directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| StorageError::Open {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;

        let meta = tokio::fs::metadata(root)
            .await
            .map_err(|e| StorageError::Open {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
        if !meta.is_dir() {
            return Err(StorageError::Open {
                path: root.display().to_string(),
                reason: "not a directory".to_owned(),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Return the root directory of this backend.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage key onto a path under the root, rejecting anything that
    /// could escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_owned(),
            reason: reason.to_owned(),
        };

        if key.is_empty() {
            return Err(invalid("path cannot be empty"));
        }
        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(invalid("path must be relative and stay under the root")),
            }
        }
        if key.ends_with(TMP_SUFFIX) {
            return Err(invalid("reserved suffix"));
        }
        Ok(self.root.join(relative))
    }

    /// Convert an on-disk path back into a `/`-separated key.
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        parts.map(|p| p.join("/"))
    }
}

#[async_trait::async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        let write_err = |e: std::io::Error| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        if let Err(e) = tokio::fs::write(&tmp, value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(key = %key, bytes = value.len(), "file written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let list_err = |reason: String| StorageError::List {
            prefix: prefix.to_owned(),
            reason,
        };

        // Start the walk at the deepest directory the prefix names.
        let start = match prefix.rfind('/') {
            Some(idx) => self.resolve(&prefix[..idx])?,
            None => self.root.clone(),
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(list_err(e.to_string())),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| list_err(e.to_string()))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| list_err(e.to_string()))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let Some(key) = self.key_for(&path) else {
                        continue;
                    };
                    if key.ends_with(TMP_SUFFIX) || !key.starts_with(prefix) {
                        continue;
                    }
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}
