//! Git worktree isolation engine.
//!
//! One worktree + branch per (feature, task), diff summaries and per-file
//! stats, patch export/apply/revert with dry-run conflict detection, and
//! merge-back with a selectable strategy. Correlated with the task graph
//! engine only by (feature, task) keys — neither depends on the other's
//! state.

mod diff;
mod git;
mod manager;
mod merge;

pub use diff::{ApplyOutcome, DiffSummary, FileChange, FileChangeStatus};
pub use git::GitError;
pub use manager::{WorktreeEngine, WorktreeInfo};
pub use merge::{CommitInfo, CommitOutcome, MergeOutcome, MergeStrategy};
