//! hive-core — multi-process coordination core for agent task execution.
//!
//! Three engines share one storage discipline:
//!
//! - [`store`]: locked, atomic JSON documents on a shared filesystem. The
//!   only write path for coordination state.
//! - [`tasks`]: task status documents, dependency-graph validation, plan
//!   import, runnable/blocked partitioning.
//! - [`worktree`]: isolated git worktrees per task, diff extraction, and
//!   conflict-aware integration back to the base branch.
//!
//! All cross-process safety comes from the store's lock files and
//! write-then-rename; nothing here assumes it is the only process touching
//! the project.

pub mod config;
pub mod store;
pub mod tasks;
pub mod worktree;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::store::DocumentStore;
use crate::tasks::TaskEngine;
use crate::worktree::WorktreeEngine;

/// Shared handles for one project root. Cheap to clone; every engine works
/// on the same store and config.
#[derive(Debug, Clone)]
pub struct CoreContext {
    pub config: Arc<CoreConfig>,
    pub store: DocumentStore,
    pub tasks: TaskEngine,
    pub worktrees: WorktreeEngine,
}

impl CoreContext {
    pub fn new(project_root: &Path, config: CoreConfig) -> Self {
        let store = DocumentStore::new(config.lock.options());
        let tasks = TaskEngine::new(project_root, store.clone());
        let worktrees = WorktreeEngine::new(project_root, &config.worktree);
        Self {
            config: Arc::new(config),
            store,
            tasks,
            worktrees,
        }
    }

    /// Context with default configuration.
    pub fn with_defaults(project_root: impl Into<PathBuf>) -> Self {
        Self::new(&project_root.into(), CoreConfig::default())
    }
}
