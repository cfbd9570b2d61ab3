//! Diff reading, patch export, and apply/revert.
//!
//! All diff reads are against a base commit (caller-supplied, usually the
//! task's recorded `baseCommit`) or the merge-base with the main checkout's
//! branch. Reads never mutate any tree, and a failing apply leaves the
//! target untouched — a `--check` dry run gates the real apply.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::git::{current_branch, run_git, run_git_stdin, GitError};
use super::manager::WorktreeEngine;

// ─── Types ───────────────────────────────────────────────────────────────────

/// Coarse diff summary for a worktree, handed to the review layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub has_diff: bool,
    /// Raw unified diff text.
    pub diff: String,
    pub files: Vec<String>,
    pub insertions: u64,
    pub deletions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Per-file change record. Binary files report zero insertions/deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub status: FileChangeStatus,
    pub insertions: u64,
    pub deletions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

/// Result of applying or reverting a patch. Conflicts are data, not errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", rename_all_fields = "camelCase")]
pub enum ApplyOutcome {
    Applied { files: Vec<String> },
    Conflicts { paths: Vec<String> },
}

// ─── Engine operations ───────────────────────────────────────────────────────

impl WorktreeEngine {
    /// Base revision for diffing a task worktree: the caller-supplied commit
    /// if given, otherwise the merge-base of the worktree and the main
    /// checkout's branch.
    async fn base_rev(
        &self,
        worktree: &Path,
        base_commit: Option<&str>,
    ) -> Result<String, GitError> {
        if let Some(base) = base_commit {
            return Ok(base.to_string());
        }
        let base_branch = current_branch(self.repo_root())?;
        run_git("diff-base", worktree, &["merge-base", &base_branch, "HEAD"]).await
    }

    /// Diff summary for a task worktree against its base. Read-only.
    pub async fn diff(
        &self,
        feature: &str,
        task: &str,
        base_commit: Option<&str>,
    ) -> Result<DiffSummary, GitError> {
        let wt = self.worktree_path(feature, task);
        let base = self.base_rev(&wt, base_commit).await?;

        let raw = run_git("diff", &wt, &["diff", &base]).await?;
        let numstat = run_git("diff", &wt, &["diff", "--numstat", &base]).await?;

        let mut files = Vec::new();
        let mut insertions = 0u64;
        let mut deletions = 0u64;
        for (ins, del, _old, path) in parse_numstat(&numstat) {
            insertions += ins.unwrap_or(0);
            deletions += del.unwrap_or(0);
            files.push(path);
        }

        Ok(DiffSummary {
            has_diff: !raw.trim().is_empty(),
            diff: raw,
            files,
            insertions,
            deletions,
        })
    }

    /// Per-file change records (status + line stats, rename-aware) for a
    /// task worktree against its base. Read-only.
    pub async fn detailed_diff(
        &self,
        feature: &str,
        task: &str,
        base_commit: Option<&str>,
    ) -> Result<Vec<FileChange>, GitError> {
        let wt = self.worktree_path(feature, task);
        let base = self.base_rev(&wt, base_commit).await?;

        let numstat = run_git("diff", &wt, &["diff", "--numstat", "-M", &base]).await?;
        let name_status = run_git("diff", &wt, &["diff", "--name-status", "-M", &base]).await?;

        let mut stats: Vec<(Option<u64>, Option<u64>, Option<String>, String)> =
            parse_numstat(&numstat);

        let mut changes = Vec::new();
        for line in name_status.lines() {
            let mut cols = line.split('\t');
            let code = match cols.next() {
                Some(c) if !c.is_empty() => c,
                _ => continue,
            };
            let first = cols.next().unwrap_or_default().to_string();
            let second = cols.next().map(str::to_string);

            let (status, old_path, path) = match code.chars().next() {
                Some('A') => (FileChangeStatus::Added, None, first),
                Some('D') => (FileChangeStatus::Deleted, None, first),
                Some('R') => match second {
                    Some(new_path) => (FileChangeStatus::Renamed, Some(first), new_path),
                    None => (FileChangeStatus::Renamed, None, first),
                },
                // Copies and type changes surface as additions/modifications.
                Some('C') => match second {
                    Some(new_path) => (FileChangeStatus::Added, None, new_path),
                    None => (FileChangeStatus::Added, None, first),
                },
                _ => (FileChangeStatus::Modified, None, first),
            };

            let (insertions, deletions) = stats
                .iter()
                .position(|(_, _, _, p)| *p == path)
                .map(|i| {
                    let (ins, del, _, _) = stats.remove(i);
                    (ins.unwrap_or(0), del.unwrap_or(0))
                })
                .unwrap_or((0, 0));

            changes.push(FileChange {
                path,
                status,
                insertions,
                deletions,
                old_path,
            });
        }

        Ok(changes)
    }

    /// Portable unified-diff snapshot of the worktree against its base,
    /// usable outside the worktree (binary-safe).
    pub async fn export_patch(
        &self,
        feature: &str,
        task: &str,
        base_commit: Option<&str>,
    ) -> Result<String, GitError> {
        let wt = self.worktree_path(feature, task);
        let base = self.base_rev(&wt, base_commit).await?;
        run_git("export-patch", &wt, &["diff", "--binary", &base]).await
    }

    /// Apply a patch to `target`. A `--check` dry run gates the real apply,
    /// so a conflicting patch leaves the tree untouched and comes back as
    /// `ApplyOutcome::Conflicts`.
    pub async fn apply_diff(&self, target: &Path, patch: &str) -> Result<ApplyOutcome, GitError> {
        self.apply_inner("apply-diff", target, patch, false).await
    }

    /// Reverse-apply a patch to `target` (undo previously applied work).
    pub async fn revert_diff(&self, target: &Path, patch: &str) -> Result<ApplyOutcome, GitError> {
        self.apply_inner("revert-diff", target, patch, true).await
    }

    async fn apply_inner(
        &self,
        op: &'static str,
        target: &Path,
        patch: &str,
        reverse: bool,
    ) -> Result<ApplyOutcome, GitError> {
        if patch.trim().is_empty() {
            return Ok(ApplyOutcome::Applied { files: Vec::new() });
        }

        let conflicts = check_patch(op, target, patch, reverse).await?;
        if !conflicts.is_empty() {
            debug!(target = %target.display(), ?conflicts, "patch does not apply cleanly");
            return Ok(ApplyOutcome::Conflicts { paths: conflicts });
        }

        // Affected paths, read from the patch itself without touching the tree.
        let numstat = run_git_stdin(
            op,
            target,
            &["apply", "--numstat", "-"],
            patch.as_bytes(),
        )
        .await?;
        let files = parse_numstat(&numstat)
            .into_iter()
            .map(|(_, _, _, path)| path)
            .collect();

        let mut args = vec!["apply", "--whitespace=nowarn"];
        if reverse {
            args.push("-R");
        }
        args.push("-");
        run_git_stdin(op, target, &args, patch.as_bytes()).await?;

        Ok(ApplyOutcome::Applied { files })
    }

    /// Dry-run conflict detection for a task's exported changes against the
    /// main checkout. Empty result means a clean apply. Never mutates.
    pub async fn check_conflicts(
        &self,
        feature: &str,
        task: &str,
        base_commit: Option<&str>,
    ) -> Result<Vec<String>, GitError> {
        let patch = self.export_patch(feature, task, base_commit).await?;
        self.check_conflicts_from_saved_diff(&patch).await
    }

    /// Same as [`check_conflicts`] but against a previously saved diff text
    /// instead of re-reading the worktree.
    ///
    /// [`check_conflicts`]: WorktreeEngine::check_conflicts
    pub async fn check_conflicts_from_saved_diff(
        &self,
        saved_diff: &str,
    ) -> Result<Vec<String>, GitError> {
        if saved_diff.trim().is_empty() {
            return Ok(Vec::new());
        }
        check_patch("check-conflicts", self.repo_root(), saved_diff, false).await
    }
}

/// `git apply --check` as a pure predicate: clean ⇒ empty list, conflicting
/// ⇒ offending paths parsed from stderr. The tree is never touched.
async fn check_patch(
    op: &'static str,
    target: &Path,
    patch: &str,
    reverse: bool,
) -> Result<Vec<String>, GitError> {
    let mut args = vec!["apply", "--check", "--whitespace=nowarn"];
    if reverse {
        args.push("-R");
    }
    args.push("-");

    match run_git_stdin(op, target, &args, patch.as_bytes()).await {
        Ok(_) => Ok(Vec::new()),
        Err(GitError::Command {
            status: Some(_),
            stderr,
            ..
        }) => {
            let paths = parse_conflict_paths(&stderr);
            if paths.is_empty() {
                // Failure without any recognizable path — surface the error.
                Err(GitError::Command {
                    op,
                    status: Some(1),
                    stderr,
                })
            } else {
                Ok(paths)
            }
        }
        Err(e) => Err(e),
    }
}

/// Parse `ins\tdel\tpath` lines from `git diff --numstat` /
/// `git apply --numstat`. Binary files report `-` and map to `None`.
/// Returns `(insertions, deletions, old_path, path)` with rename notation
/// (`old => new`, `pre{old => new}post`) resolved.
fn parse_numstat(text: &str) -> Vec<(Option<u64>, Option<u64>, Option<String>, String)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut cols = line.split('\t');
        let (ins, del, rest) = match (cols.next(), cols.next(), cols.next()) {
            (Some(i), Some(d), Some(r)) if !r.is_empty() => (i, d, r),
            _ => continue,
        };
        let ins = ins.parse::<u64>().ok();
        let del = del.parse::<u64>().ok();
        let (old_path, path) = split_rename(rest);
        out.push((ins, del, old_path, path));
    }
    out
}

/// Resolve git's rename path notation into `(old, new)`.
fn split_rename(raw: &str) -> (Option<String>, String) {
    // Braced form: `src/{old => new}/mod.rs`.
    if let (Some(open), Some(close)) = (raw.find('{'), raw.find('}')) {
        if open < close {
            if let Some((old_mid, new_mid)) = raw[open + 1..close].split_once(" => ") {
                let prefix = &raw[..open];
                let suffix = &raw[close + 1..];
                let old = format!("{prefix}{old_mid}{suffix}").replace("//", "/");
                let new = format!("{prefix}{new_mid}{suffix}").replace("//", "/");
                return (Some(old), new);
            }
        }
    }
    // Plain form: `old.rs => new.rs`.
    if let Some((old, new)) = raw.split_once(" => ") {
        return (Some(old.to_string()), new.to_string());
    }
    (None, raw.to_string())
}

/// Pull conflicting paths out of `git apply` stderr. Two shapes appear:
/// `error: patch failed: <path>:<line>` and `error: <path>: <reason>`.
/// Paths may contain spaces, so each shape is anchored on its fixed part:
/// the numeric line suffix for the first, a known reason for the second.
fn parse_conflict_paths(stderr: &str) -> Vec<String> {
    const REASONS: &[&str] = &[
        "patch does not apply",
        "already exists in working directory",
        "does not exist in index",
        "No such file or directory",
    ];

    let mut paths: Vec<String> = Vec::new();
    for line in stderr.lines() {
        let line = line.trim();
        let path = if let Some(rest) = line.strip_prefix("error: patch failed: ") {
            rest.rsplit_once(':')
                .filter(|(_, ln)| !ln.is_empty() && ln.chars().all(|c| c.is_ascii_digit()))
                .map(|(p, _)| p.to_string())
        } else if let Some(rest) = line.strip_prefix("error: ") {
            REASONS.iter().find_map(|reason| {
                rest.strip_suffix(reason)
                    .and_then(|p| p.trim_end().strip_suffix(':'))
                    .map(str::to_string)
            })
        } else {
            None
        };
        if let Some(p) = path {
            let p = p.trim().to_string();
            if !p.is_empty() && !paths.contains(&p) {
                paths.push(p);
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numstat_parses_counts_and_binary() {
        let parsed = parse_numstat("3\t1\tsrc/lib.rs\n-\t-\tassets/logo.png\n");
        assert_eq!(
            parsed,
            vec![
                (Some(3), Some(1), None, "src/lib.rs".to_string()),
                (None, None, None, "assets/logo.png".to_string()),
            ]
        );
    }

    #[test]
    fn numstat_resolves_rename_notation() {
        let parsed = parse_numstat("1\t0\tsrc/{old => new}/mod.rs\n2\t2\ta.rs => b.rs\n");
        assert_eq!(
            parsed[0],
            (
                Some(1),
                Some(0),
                Some("src/old/mod.rs".to_string()),
                "src/new/mod.rs".to_string()
            )
        );
        assert_eq!(
            parsed[1],
            (Some(2), Some(2), Some("a.rs".to_string()), "b.rs".to_string())
        );
    }

    #[test]
    fn conflict_paths_from_apply_stderr() {
        let stderr = "\
error: patch failed: src/main.rs:12
error: src/main.rs: patch does not apply
error: lib/util.rs: already exists in working directory";
        assert_eq!(
            parse_conflict_paths(stderr),
            vec!["src/main.rs".to_string(), "lib/util.rs".to_string()]
        );
    }

    #[test]
    fn conflict_paths_with_spaces() {
        let stderr = "\
error: patch failed: My Docs/release notes.md:3
error: My Docs/release notes.md: patch does not apply
error: corrupt patch at line 5";
        assert_eq!(
            parse_conflict_paths(stderr),
            vec!["My Docs/release notes.md".to_string()]
        );
    }
}
