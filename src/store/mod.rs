//! Locked, atomic JSON document store.
//!
//! State lives as flat JSON documents on a shared filesystem, mutated
//! concurrently by independent OS processes (editor extension, worker
//! agents, CLIs). This module is the only write path: per-path lock files
//! serialize writers, and every write is temp-file-then-rename so readers
//! never observe a partial document.

mod lock;
mod merge;

pub use lock::{acquire_lock, acquire_lock_async, lock_path_for, LockGuard, LockOptions, LOCK_SUFFIX};
pub use merge::{deep_merge, Patch};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Errors from the document store. `LockTimeout` is the retryable kind —
/// callers may wait and try again; it is not evidence of corruption.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("timed out after {timeout:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value document store over the filesystem: path → JSON document.
///
/// Explicitly constructed and passed to the engines that need it — there is
/// no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    lock: LockOptions,
}

impl DocumentStore {
    pub fn new(lock: LockOptions) -> Self {
        Self { lock }
    }

    pub fn lock_options(&self) -> &LockOptions {
        &self.lock
    }

    /// Write `bytes` to a temporary file in the target's directory, then
    /// rename it over the target. Concurrent readers see either the fully
    /// old or the fully new content.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        tmp.write_all(bytes).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.persist(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Read and deserialize a document. An absent file is an expected
    /// outcome and returns `Ok(None)`.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Serialize (pretty-printed) and write atomically.
    pub fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_atomic(path, &bytes)
    }

    /// Locked read-modify-write: acquire the document's lock, read the
    /// current document (or `default`, or `{}`), deep-merge `patch`, write
    /// atomically, release. The lock is released on every exit path.
    ///
    /// Returns the merged document.
    pub fn patch_json_locked(
        &self,
        path: &Path,
        patch: Value,
        default: Option<Value>,
    ) -> Result<Value, StoreError> {
        let mut guard = acquire_lock(path, &self.lock)?;
        let result = self.patch_unlocked(path, patch, default);
        guard.release();
        result
    }

    /// Async variant of [`patch_json_locked`] with identical semantics; the
    /// filesystem work runs on the blocking pool.
    ///
    /// [`patch_json_locked`]: DocumentStore::patch_json_locked
    pub async fn patch_json_locked_async(
        &self,
        path: &Path,
        patch: Value,
        default: Option<Value>,
    ) -> Result<Value, StoreError> {
        let mut guard = acquire_lock_async(path, &self.lock).await?;

        let store = self.clone();
        let path_owned = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            store.patch_unlocked(&path_owned, patch, default)
        })
        .await
        .map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;

        guard.release();
        result
    }

    fn patch_unlocked(
        &self,
        path: &Path,
        patch: Value,
        default: Option<Value>,
    ) -> Result<Value, StoreError> {
        let mut doc: Value = self
            .read_json(path)?
            .or(default)
            .unwrap_or_else(|| Value::Object(Map::new()));
        deep_merge(&mut doc, patch);
        self.write_json_atomic(path, &doc)?;
        Ok(doc)
    }
}
