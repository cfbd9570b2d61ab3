//! Committing task work and merging it back into the base branch.
//!
//! Merge conflicts are data, not errors: on conflict the underlying git
//! operation is aborted (the main checkout is never left mid-merge) and the
//! conflicting paths are returned as [`MergeOutcome::Conflicts`] so the UI
//! can render them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::git::{current_branch, run_git, GitError};
use super::manager::WorktreeEngine;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// `git merge --no-ff` — preserves the task branch's full history.
    Merge,
    /// `git merge --squash` — exactly one new commit with all changes.
    Squash,
    /// Rebase the task branch onto base, then fast-forward.
    Rebase,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", rename_all_fields = "camelCase")]
pub enum MergeOutcome {
    Merged { commit: String, files: Vec<String> },
    Conflicts { paths: Vec<String> },
}

/// Result of a commit attempt. `committed == false` means the worktree was
/// clean and no commit was created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// One commit on a task branch, recorded into the task's status document by
/// the completion flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ─── Engine operations ───────────────────────────────────────────────────────

impl WorktreeEngine {
    /// Stage and commit all current changes in a task worktree.
    pub async fn commit_changes(
        &self,
        feature: &str,
        task: &str,
        message: &str,
    ) -> Result<CommitOutcome, GitError> {
        let wt = self.worktree_path(feature, task);

        let status = run_git("commit", &wt, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(CommitOutcome {
                committed: false,
                commit: None,
            });
        }

        run_git("commit", &wt, &["add", "-A"]).await?;
        run_git("commit", &wt, &["commit", "-m", message]).await?;
        let sha = run_git("commit", &wt, &["rev-parse", "HEAD"]).await?;
        info!(feature, task, commit = %sha, "task changes committed");

        Ok(CommitOutcome {
            committed: true,
            commit: Some(sha),
        })
    }

    /// Commits on the task branch since `base`, newest first.
    pub async fn log_commits(
        &self,
        feature: &str,
        task: &str,
        base: &str,
    ) -> Result<Vec<CommitInfo>, GitError> {
        let wt = self.worktree_path(feature, task);
        let range = format!("{base}..HEAD");
        let out = run_git(
            "log",
            &wt,
            &["log", "--format=%H%x1f%s%x1f%cI", &range],
        )
        .await?;

        let mut commits = Vec::new();
        for line in out.lines() {
            let mut parts = line.split('\u{1f}');
            let (sha, message, ts) = match (parts.next(), parts.next(), parts.next()) {
                (Some(sha), Some(msg), Some(ts)) => (sha, msg, ts),
                _ => continue,
            };
            match DateTime::parse_from_rfc3339(ts) {
                Ok(t) => commits.push(CommitInfo {
                    sha: sha.to_string(),
                    message: message.to_string(),
                    timestamp: t.with_timezone(&Utc),
                }),
                Err(e) => warn!(sha, err = %e, "unparseable commit timestamp — skipping"),
            }
        }
        Ok(commits)
    }

    /// Integrate the task branch into the base branch using `strategy`.
    ///
    /// On success returns the merge commit and the merged file list; on
    /// conflict the operation is aborted and the conflicting paths returned.
    pub async fn merge(
        &self,
        feature: &str,
        task: &str,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome, GitError> {
        let repo = self.repo_root().to_path_buf();
        let branch = self.branch_name(feature, task);
        let pre = run_git("merge", &repo, &["rev-parse", "HEAD"]).await?;

        match strategy {
            MergeStrategy::Merge => {
                let msg = format!("Merge {branch}");
                if let Err(e) = run_git(
                    "merge",
                    &repo,
                    &["merge", "--no-ff", "-m", &msg, &branch],
                )
                .await
                {
                    let conflicts = self.unmerged_paths(&repo).await?;
                    if conflicts.is_empty() {
                        return Err(e);
                    }
                    run_git("merge", &repo, &["merge", "--abort"]).await.ok();
                    return Ok(MergeOutcome::Conflicts { paths: conflicts });
                }
            }
            MergeStrategy::Squash => {
                if let Err(e) = run_git("merge", &repo, &["merge", "--squash", &branch]).await {
                    let conflicts = self.unmerged_paths(&repo).await?;
                    if conflicts.is_empty() {
                        return Err(e);
                    }
                    // A squash conflict has no MERGE_HEAD; reset clears it.
                    run_git("merge", &repo, &["reset", "--merge"]).await.ok();
                    return Ok(MergeOutcome::Conflicts { paths: conflicts });
                }
                // Nothing staged means the branch had no changes over base.
                let staged =
                    run_git("merge", &repo, &["diff", "--cached", "--name-only"]).await?;
                if staged.trim().is_empty() {
                    return Ok(MergeOutcome::Merged {
                        commit: pre,
                        files: Vec::new(),
                    });
                }
                let msg = format!("Squash {branch}");
                run_git("merge", &repo, &["commit", "-m", &msg]).await?;
            }
            MergeStrategy::Rebase => {
                let wt = self.worktree_path(feature, task);
                let base_branch = current_branch(&repo)?;
                if let Err(e) = run_git("merge", &wt, &["rebase", &base_branch]).await {
                    let conflicts = self.unmerged_paths(&wt).await?;
                    run_git("merge", &wt, &["rebase", "--abort"]).await.ok();
                    if conflicts.is_empty() {
                        return Err(e);
                    }
                    return Ok(MergeOutcome::Conflicts { paths: conflicts });
                }
                run_git("merge", &repo, &["merge", "--ff-only", &branch]).await?;
            }
        }

        let commit = run_git("merge", &repo, &["rev-parse", "HEAD"]).await?;
        let range = format!("{pre}..HEAD");
        let files_out = run_git("merge", &repo, &["diff", "--name-only", &pre, "HEAD"]).await?;
        let files: Vec<String> = files_out
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect();
        info!(feature, task, ?strategy, commit = %commit, range = %range, "task branch merged");

        Ok(MergeOutcome::Merged { commit, files })
    }

    async fn unmerged_paths(&self, dir: &std::path::Path) -> Result<Vec<String>, GitError> {
        let out = run_git(
            "merge",
            dir,
            &["diff", "--name-only", "--diff-filter=U"],
        )
        .await?;
        Ok(out
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }
}
