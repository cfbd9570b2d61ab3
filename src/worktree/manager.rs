//! Per-task git worktree manager.
//!
//! Every (feature, task) pair gets its own worktree isolated from the main
//! checkout. Worktrees live at `.hive/.worktrees/<feature>/<task>` and are
//! branched as `hive/<feature>/<task>` from the base branch. Both the path
//! and the branch name are deterministic functions of (feature, task), so
//! any process can find a worktree without shared in-memory state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WorktreeSection;

use super::git::{current_branch, run_git, GitError};

/// Handle to one task worktree, handed to the execution/sandbox layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeInfo {
    pub feature: String,
    pub task: String,
    pub path: PathBuf,
    /// Branch name: `hive/<feature>/<task>`.
    pub branch: String,
    /// HEAD of the worktree at the time this info was read.
    pub commit: String,
}

/// Creates, finds, and removes per-task worktrees. At most one worktree
/// exists per (feature, task); callers above this layer are responsible for
/// not operating on the same worktree concurrently.
#[derive(Debug, Clone)]
pub struct WorktreeEngine {
    repo_root: PathBuf,
    worktree_base: PathBuf,
    branch_prefix: String,
}

impl WorktreeEngine {
    pub fn new(repo_root: &Path, config: &WorktreeSection) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            worktree_base: repo_root.join(&config.dir),
            branch_prefix: config.branch_prefix.clone(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Deterministic branch name for a task worktree.
    pub fn branch_name(&self, feature: &str, task: &str) -> String {
        format!("{}/{}/{}", self.branch_prefix, feature, task)
    }

    /// Deterministic on-disk location for a task worktree.
    pub fn worktree_path(&self, feature: &str, task: &str) -> PathBuf {
        self.worktree_base.join(feature).join(task)
    }

    /// Create the worktree for (feature, task), branched from `base_branch`
    /// (default: the main checkout's current branch). Idempotent: if the
    /// worktree already exists its info is returned unchanged.
    pub async fn create(
        &self,
        feature: &str,
        task: &str,
        base_branch: Option<&str>,
    ) -> Result<WorktreeInfo, GitError> {
        if let Some(existing) = self.get(feature, task).await? {
            debug!(feature, task, "worktree already exists — reusing");
            return Ok(existing);
        }

        let path = self.worktree_path(feature, task);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| GitError::Io {
                    op: "worktree-add",
                    source,
                })?;
        }

        let base = match base_branch {
            Some(b) => b.to_string(),
            None => current_branch(&self.repo_root)?,
        };
        let branch = self.branch_name(feature, task);
        let path_str = path.to_string_lossy().into_owned();

        if self.branch_exists(&branch).await? {
            // Branch left over from an earlier run — reattach instead of -b.
            run_git(
                "worktree-add",
                &self.repo_root,
                &["worktree", "add", &path_str, &branch],
            )
            .await?;
        } else {
            run_git(
                "worktree-add",
                &self.repo_root,
                &["worktree", "add", "-b", &branch, &path_str, &base],
            )
            .await?;
        }

        let commit = run_git("worktree-add", &path, &["rev-parse", "HEAD"]).await?;
        info!(feature, task, branch = %branch, base = %base, "worktree created");

        Ok(WorktreeInfo {
            feature: feature.to_string(),
            task: task.to_string(),
            path,
            branch,
            commit,
        })
    }

    /// Look up the worktree for (feature, task). Absence is an expected
    /// outcome and returns `Ok(None)`.
    pub async fn get(&self, feature: &str, task: &str) -> Result<Option<WorktreeInfo>, GitError> {
        let path = self.worktree_path(feature, task);
        if !path.exists() {
            return Ok(None);
        }
        let commit = run_git("worktree-head", &path, &["rev-parse", "HEAD"]).await?;
        Ok(Some(WorktreeInfo {
            feature: feature.to_string(),
            task: task.to_string(),
            path,
            branch: self.branch_name(feature, task),
            commit,
        }))
    }

    /// All worktrees belonging to a feature.
    pub async fn list(&self, feature: &str) -> Result<Vec<WorktreeInfo>, GitError> {
        let dir = self.worktree_base.join(feature);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(GitError::Io {
                    op: "worktree-list",
                    source,
                })
            }
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| GitError::Io {
            op: "worktree-list",
            source,
        })? {
            let task = entry.file_name().to_string_lossy().into_owned();
            if let Some(info) = self.get(feature, &task).await? {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.task.cmp(&b.task));
        Ok(infos)
    }

    /// Remove a task worktree. Returns `false` if none existed. Git removal
    /// is attempted first; if it fails the directory is cleaned manually and
    /// the worktree metadata pruned.
    pub async fn remove(&self, feature: &str, task: &str) -> Result<bool, GitError> {
        let path = self.worktree_path(feature, task);
        if !path.exists() {
            return Ok(false);
        }

        let path_str = path.to_string_lossy().into_owned();
        if let Err(e) = run_git(
            "worktree-remove",
            &self.repo_root,
            &["worktree", "remove", "--force", &path_str],
        )
        .await
        {
            warn!(feature, task, err = %e, "git worktree remove failed — cleaning directory manually");
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await.ok();
            }
        }
        self.prune().await?;
        debug!(feature, task, "worktree removed");
        Ok(true)
    }

    /// Remove every worktree of a feature, delete their branches, and prune
    /// orphaned worktree metadata. Returns how many worktrees were removed.
    pub async fn cleanup(&self, feature: &str) -> Result<usize, GitError> {
        let infos = self.list(feature).await?;
        let mut removed = 0;
        for info in &infos {
            if self.remove(feature, &info.task).await? {
                removed += 1;
            }
            // Branch deletion is best-effort: the branch may already be
            // merged and deleted, or still checked out elsewhere.
            if let Err(e) = run_git(
                "branch-delete",
                &self.repo_root,
                &["branch", "-D", &info.branch],
            )
            .await
            {
                debug!(branch = %info.branch, err = %e, "branch delete skipped");
            }
        }

        let feature_dir = self.worktree_base.join(feature);
        if feature_dir.exists() {
            tokio::fs::remove_dir_all(&feature_dir).await.ok();
        }
        self.prune().await?;
        info!(feature, removed, "feature worktrees cleaned up");
        Ok(removed)
    }

    /// `git worktree prune` — drops metadata for manually deleted worktrees.
    pub async fn prune(&self) -> Result<(), GitError> {
        run_git("worktree-prune", &self.repo_root, &["worktree", "prune"]).await?;
        Ok(())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let r = format!("refs/heads/{branch}");
        match run_git(
            "branch-lookup",
            &self.repo_root,
            &["show-ref", "--verify", "--quiet", &r],
        )
        .await
        {
            Ok(_) => Ok(true),
            Err(GitError::Command {
                status: Some(1), ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
