//! Per-document lock files.
//!
//! Every document `<path>` is guarded by a colocated `<path>.lock` marker
//! created with `O_EXCL`. Acquisition is a bounded retry loop; a lock whose
//! file is older than the configured stale TTL is presumed abandoned by a
//! crashed writer and forcibly broken.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::StoreError;

/// Suffix appended to a document path to form its lock marker.
pub const LOCK_SUFFIX: &str = ".lock";

/// Tuning for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Give up with `StoreError::LockTimeout` after this long.
    pub timeout: Duration,
    /// Sleep between acquisition attempts.
    pub retry_interval: Duration,
    /// A lock file older than this is broken and re-acquired.
    pub stale_ttl: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
            stale_ttl: Duration::from_secs(60),
        }
    }
}

/// Held lock on a document. Releasing is idempotent; dropping an unreleased
/// guard releases it.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: Option<PathBuf>,
}

impl LockGuard {
    /// Delete the lock marker. Safe to call more than once; only the first
    /// call touches the filesystem.
    pub fn release(&mut self) {
        if let Some(path) = self.lock_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "lock released"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), err = %e, "failed to remove lock file"),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Compute the lock marker path for a document: `<path>.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(LOCK_SUFFIX);
    PathBuf::from(os)
}

/// Acquire the lock for `path`, blocking the calling thread.
///
/// Retries every `retry_interval` until `timeout` elapses. An existing lock
/// older than `stale_ttl` is broken before the next attempt.
pub fn acquire_lock(path: &Path, opts: &LockOptions) -> Result<LockGuard, StoreError> {
    let lock_path = lock_path_for(path);
    let deadline = Instant::now() + opts.timeout;
    loop {
        if let Some(guard) = try_create(&lock_path)? {
            return Ok(guard);
        }
        break_if_stale(&lock_path, opts.stale_ttl)?;
        if Instant::now() >= deadline {
            return Err(StoreError::LockTimeout {
                path: path.to_path_buf(),
                timeout: opts.timeout,
            });
        }
        std::thread::sleep(opts.retry_interval);
    }
}

/// Async variant of [`acquire_lock`] with identical semantics; the wait
/// between attempts yields to the runtime instead of blocking the thread.
pub async fn acquire_lock_async(path: &Path, opts: &LockOptions) -> Result<LockGuard, StoreError> {
    let lock_path = lock_path_for(path);
    let deadline = Instant::now() + opts.timeout;
    loop {
        if let Some(guard) = try_create(&lock_path)? {
            return Ok(guard);
        }
        break_if_stale(&lock_path, opts.stale_ttl)?;
        if Instant::now() >= deadline {
            return Err(StoreError::LockTimeout {
                path: path.to_path_buf(),
                timeout: opts.timeout,
            });
        }
        tokio::time::sleep(opts.retry_interval).await;
    }
}

/// One exclusive-create attempt. `Ok(None)` means another writer holds the
/// lock.
fn try_create(lock_path: &Path) -> Result<Option<LockGuard>, StoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            // Holder metadata is diagnostic only — staleness is judged by
            // the file's mtime, not by this body.
            let body = serde_json::json!({
                "pid": std::process::id(),
                "acquiredAt": chrono::Utc::now().to_rfc3339(),
            });
            let _ = file.write_all(body.to_string().as_bytes());
            debug!(path = %lock_path.display(), "lock acquired");
            Ok(Some(LockGuard {
                lock_path: Some(lock_path.to_path_buf()),
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}

/// Remove the lock file if its mtime is older than `ttl`. Returns whether a
/// stale lock was broken. A concurrent removal is not an error.
fn break_if_stale(lock_path: &Path, ttl: Duration) -> Result<bool, StoreError> {
    let meta = match std::fs::metadata(lock_path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(StoreError::Io {
                path: lock_path.to_path_buf(),
                source,
            })
        }
    };

    let age = match meta.modified().ok().and_then(|m| m.elapsed().ok()) {
        Some(age) => age,
        // Unreadable or future mtime — treat as fresh.
        None => return Ok(false),
    };
    if age <= ttl {
        return Ok(false);
    }

    warn!(
        path = %lock_path.display(),
        age_secs = age.as_secs(),
        "breaking stale lock"
    );
    match std::fs::remove_file(lock_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(source) => Err(StoreError::Io {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}
