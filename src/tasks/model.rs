//! Task status documents and folder-id helpers.
//!
//! One `status.json` per task, stored at
//! `.hive/features/<feature>/tasks/<NN-slug>/status.json`. Documents are
//! camelCase JSON; the folder id's zero-padded order prefix makes lexical
//! order equal creation order.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worktree::{CommitInfo, FileChange};

/// Current status document schema.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
    /// Reported by a worker that cannot proceed. Distinct from "blocked by
    /// an unmet dependency", which is computed on demand and never stored.
    Blocked,
    Failed,
    Partial,
}

impl TaskStatus {
    /// Statuses that end a task's run and stamp `completedAt`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Partial
        )
    }

    /// Only `done` satisfies a dependency edge.
    pub fn satisfies_dependency(self) -> bool {
        self == TaskStatus::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    Plan,
    Manual,
}

/// Liveness record written by background workers. Every field is optional so
/// a heartbeat can update `lastHeartbeatAt` alone without clobbering the
/// rest — only the latest heartbeat is retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
}

/// The task's on-disk status document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub status: TaskStatus,
    pub origin: TaskOrigin,
    /// Ordered set of task folder ids this task depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_session: Option<WorkerSession>,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
    #[serde(default)]
    pub changed_files: Vec<FileChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl TaskDocument {
    pub fn new(origin: TaskOrigin, depends_on: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            status: TaskStatus::Pending,
            origin,
            depends_on,
            subtasks: Vec::new(),
            summary: None,
            blocker: None,
            base_commit: None,
            idempotency_key: None,
            worker_session: None,
            commits: Vec::new(),
            changed_files: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A task plus its location, handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub feature: String,
    /// Folder id, e.g. `01-setup`.
    pub id: String,
    /// Slug part of the folder id.
    pub name: String,
    pub order: u32,
    pub path: PathBuf,
    pub document: TaskDocument,
}

// ─── Folder ids ──────────────────────────────────────────────────────────────

/// Lowercase, hyphen-separated slug of a task name. A name with no
/// alphanumeric characters at all falls back to `task` so the folder id
/// never ends up bare.
pub fn make_slug(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(48).collect();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// `NN-slug` folder id. The zero-padded order prefix guarantees that
/// alphabetical sort equals creation order.
pub fn folder_id(order: u32, name: &str) -> String {
    format!("{:02}-{}", order, make_slug(name))
}

/// Split a folder id back into `(order, slug)`.
pub fn parse_folder_id(id: &str) -> Option<(u32, &str)> {
    let (prefix, slug) = id.split_once('-')?;
    let order = prefix.parse::<u32>().ok()?;
    Some((order, slug))
}
