//! Subprocess git runner.
//!
//! Every git invocation captures stdout/stderr and wraps failure in a
//! [`GitError`] naming the operation, so callers never see raw process
//! output as an error. No timeout is imposed here — callers may add one.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Wrapped git failure. `op` is the engine operation (`"worktree-add"`,
/// `"merge"`, …), not the raw argv.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {op} failed (exit {status:?}): {stderr}")]
    Command {
        op: &'static str,
        status: Option<i32>,
        stderr: String,
    },

    #[error("git {op} failed: {source}")]
    Repo {
        op: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("git {op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl GitError {
    pub fn op(&self) -> &'static str {
        match self {
            GitError::Command { op, .. } | GitError::Repo { op, .. } | GitError::Io { op, .. } => {
                op
            }
        }
    }
}

/// Run git in `dir`, returning trimmed stdout on success.
pub(crate) async fn run_git(
    op: &'static str,
    dir: &Path,
    args: &[&str],
) -> Result<String, GitError> {
    debug!(op, dir = %dir.display(), ?args, "git");
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| GitError::Io { op, source })?;

    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string())
    } else {
        Err(GitError::Command {
            op,
            status: out.status.code(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }
}

/// Run git in `dir` feeding `input` on stdin (for `git apply -`).
pub(crate) async fn run_git_stdin(
    op: &'static str,
    dir: &Path,
    args: &[&str],
    input: &[u8],
) -> Result<String, GitError> {
    debug!(op, dir = %dir.display(), ?args, bytes = input.len(), "git (stdin)");
    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| GitError::Io { op, source })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input)
            .await
            .map_err(|source| GitError::Io { op, source })?;
        // Close stdin so git sees EOF.
        drop(stdin);
    }

    let out = child
        .wait_with_output()
        .await
        .map_err(|source| GitError::Io { op, source })?;

    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string())
    } else {
        Err(GitError::Command {
            op,
            status: out.status.code(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }
}

/// Current branch of the checkout at `repo_path`, via libgit2 (read-only
/// local plumbing). Detached HEAD yields the short commit id, which is
/// equally valid as a worktree base.
pub(crate) fn current_branch(repo_path: &Path) -> Result<String, GitError> {
    let op = "current-branch";
    let repo = git2::Repository::open(repo_path).map_err(|source| GitError::Repo { op, source })?;
    let head = repo.head().map_err(|source| GitError::Repo { op, source })?;
    if head.is_branch() {
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    } else {
        let oid = head
            .peel_to_commit()
            .map_err(|source| GitError::Repo { op, source })?
            .id();
        Ok(format!("{:.7}", oid))
    }
}
