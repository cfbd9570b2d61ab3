//! Core configuration (`hive.toml`).
//!
//! Every section has a `Default` and is `#[serde(default)]`, so a missing or
//! partial file always yields a usable config. Instances are constructed
//! explicitly and handed to the engines — there is no global accessor.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::LockOptions;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_LOCK_RETRY_INTERVAL_MS: u64 = 50;
const DEFAULT_LOCK_STALE_TTL_MS: u64 = 60_000;
const DEFAULT_WORKTREE_DIR: &str = ".hive/.worktrees";
const DEFAULT_BRANCH_PREFIX: &str = "hive";

// ─── LockSection ─────────────────────────────────────────────────────────────

/// Document lock tuning (`[lock]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockSection {
    /// Give up acquiring a document lock after this many milliseconds.
    pub timeout_ms: u64,
    /// Sleep between acquisition attempts.
    pub retry_interval_ms: u64,
    /// A lock file older than this is presumed abandoned and broken.
    pub stale_ttl_ms: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_LOCK_RETRY_INTERVAL_MS,
            stale_ttl_ms: DEFAULT_LOCK_STALE_TTL_MS,
        }
    }
}

impl LockSection {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            stale_ttl: Duration::from_millis(self.stale_ttl_ms),
        }
    }
}

// ─── WorktreeSection ─────────────────────────────────────────────────────────

/// Worktree layout (`[worktree]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorktreeSection {
    /// Directory for per-task worktrees, relative to the repo root.
    pub dir: String,
    /// Branch prefix: branches are named `<prefix>/<feature>/<task>`.
    pub branch_prefix: String,
}

impl Default for WorktreeSection {
    fn default() -> Self {
        Self {
            dir: DEFAULT_WORKTREE_DIR.to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
        }
    }
}

// ─── CoreConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    pub lock: LockSection,
    pub worktree: WorktreeSection,
}

impl CoreConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: CoreConfig = toml::from_str("[lock]\ntimeout_ms = 250\n").expect("parse");
        assert_eq!(cfg.lock.timeout_ms, 250);
        assert_eq!(cfg.lock.retry_interval_ms, DEFAULT_LOCK_RETRY_INTERVAL_MS);
        assert_eq!(cfg.worktree.branch_prefix, DEFAULT_BRANCH_PREFIX);
    }

    #[test]
    fn empty_is_default() {
        let cfg: CoreConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg.lock.timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
        assert_eq!(cfg.worktree.dir, DEFAULT_WORKTREE_DIR);
    }
}
