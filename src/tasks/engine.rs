//! Task lifecycle engine over the locked document store.
//!
//! Two write paths exist by design: `update` is the completion flow's full
//! update and the only writer of status/summary/completedAt; background
//! workers go through `patch_background_fields`, which is allow-list
//! filtered so many concurrent workers can report liveness without racing
//! the completion writer. Both paths are read-under-lock → merge →
//! write-atomic through the store.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::store::{acquire_lock, DocumentStore, StoreError};
use crate::worktree::{CommitInfo, FileChange};

use super::graph::{
    compute_runnable_and_blocked, resolve_dependencies, validate_dependency_graph, GraphError,
    TaskNode, TaskPartition,
};
use super::model::{folder_id, parse_folder_id, TaskDocument, TaskInfo, TaskOrigin, TaskStatus};
use super::plan::parse_plan;

/// Document fields a background worker may touch. Everything else —
/// status, summary, completedAt in particular — is owned by the completion
/// flow and silently dropped from background patches.
const BACKGROUND_FIELDS: &[&str] = &["idempotencyKey", "workerSession"];

const STATUS_FILE: &str = "status.json";
const BRIEF_FILE: &str = "spec.md";

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("task store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Completion-flow update. Absent fields are left untouched; `commits` and
/// `changedFiles` replace the stored arrays wholesale.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commits: Option<Vec<CommitInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_files: Option<Vec<FileChange>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocker: Option<String>,
}

/// Builds, validates, and mutates a feature's task set. All state lives in
/// `status.json` documents under the feature's tasks directory; every
/// mutation goes through the locked store.
#[derive(Debug, Clone)]
pub struct TaskEngine {
    root: PathBuf,
    store: DocumentStore,
}

impl TaskEngine {
    pub fn new(root: impl Into<PathBuf>, store: DocumentStore) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    fn tasks_dir(&self, feature: &str) -> PathBuf {
        self.root
            .join(".hive")
            .join("features")
            .join(feature)
            .join("tasks")
    }

    fn task_dir(&self, feature: &str, id: &str) -> PathBuf {
        self.tasks_dir(feature).join(id)
    }

    fn status_path(&self, feature: &str, id: &str) -> PathBuf {
        self.task_dir(feature, id).join(STATUS_FILE)
    }

    // ─── Creation ─────────────────────────────────────────────────────────────

    /// Create a single task. Order allocation is serialized by a lock on the
    /// feature's tasks directory, so two concurrent creators never claim the
    /// same order prefix.
    pub async fn create(
        &self,
        feature: &str,
        name: &str,
        order: Option<u32>,
        depends_on: Option<Vec<u32>>,
        origin: TaskOrigin,
    ) -> Result<TaskInfo, TaskError> {
        let engine = self.clone();
        let feature = feature.to_string();
        let name = name.to_string();
        run_blocking(move || engine.create_blocking(&feature, &name, order, depends_on, origin))
            .await
    }

    fn create_blocking(
        &self,
        feature: &str,
        name: &str,
        order: Option<u32>,
        depends_on: Option<Vec<u32>>,
        origin: TaskOrigin,
    ) -> Result<TaskInfo, TaskError> {
        let tasks_dir = self.tasks_dir(feature);
        std::fs::create_dir_all(&tasks_dir)?;
        let mut guard = acquire_lock(&tasks_dir, self.store.lock_options())?;
        let result = self.create_locked(feature, name, order, depends_on, origin);
        guard.release();
        result
    }

    fn create_locked(
        &self,
        feature: &str,
        name: &str,
        order: Option<u32>,
        depends_on: Option<Vec<u32>>,
        origin: TaskOrigin,
    ) -> Result<TaskInfo, TaskError> {
        let existing = self.scan_blocking(feature)?;

        if let Some(requested) = order {
            if existing.iter().any(|t| t.order == requested) {
                return Err(GraphError::DuplicateOrder { order: requested }.into());
            }
        }
        let order = order.unwrap_or_else(|| {
            existing.iter().map(|t| t.order).max().unwrap_or(0) + 1
        });

        let known: Vec<(u32, String)> =
            existing.iter().map(|t| (t.order, t.id.clone())).collect();
        let deps = resolve_dependencies(&known, depends_on.as_deref(), order)?;

        let id = folder_id(order, name);
        let mut nodes: Vec<TaskNode> = existing
            .iter()
            .map(|t| TaskNode {
                id: t.id.clone(),
                status: t.document.status,
                depends_on: t.document.depends_on.clone(),
            })
            .collect();
        nodes.push(TaskNode {
            id: id.clone(),
            status: TaskStatus::Pending,
            depends_on: deps.clone(),
        });
        validate_dependency_graph(&nodes)?;

        let document = TaskDocument::new(origin, deps);
        let path = self.task_dir(feature, &id);
        self.store
            .write_json_atomic(&path.join(STATUS_FILE), &document)?;
        info!(feature, task = %id, order, "task created");

        Ok(TaskInfo {
            feature: feature.to_string(),
            name: parse_folder_id(&id)
                .map(|(_, slug)| slug.to_string())
                .unwrap_or_else(|| name.to_string()),
            id,
            order,
            path,
            document,
        })
    }

    /// Parse plan text, resolve and validate the whole dependency graph, and
    /// only then create the tasks. A rejected plan writes nothing.
    pub async fn create_from_plan(
        &self,
        feature: &str,
        plan_text: &str,
    ) -> Result<Vec<TaskInfo>, TaskError> {
        let engine = self.clone();
        let feature = feature.to_string();
        let plan_text = plan_text.to_string();
        run_blocking(move || engine.create_from_plan_blocking(&feature, &plan_text)).await
    }

    fn create_from_plan_blocking(
        &self,
        feature: &str,
        plan_text: &str,
    ) -> Result<Vec<TaskInfo>, TaskError> {
        let planned = parse_plan(plan_text);
        if planned.is_empty() {
            return Ok(Vec::new());
        }

        let tasks_dir = self.tasks_dir(feature);
        std::fs::create_dir_all(&tasks_dir)?;
        let mut guard = acquire_lock(&tasks_dir, self.store.lock_options())?;
        let result = self.create_from_plan_locked(feature, &planned);
        guard.release();
        result
    }

    fn create_from_plan_locked(
        &self,
        feature: &str,
        planned: &[super::plan::PlannedTask],
    ) -> Result<Vec<TaskInfo>, TaskError> {
        let existing = self.scan_blocking(feature)?;

        let mut known: Vec<(u32, String)> =
            existing.iter().map(|t| (t.order, t.id.clone())).collect();
        for p in planned {
            if known.iter().any(|(o, _)| *o == p.order) {
                return Err(GraphError::DuplicateOrder { order: p.order }.into());
            }
            known.push((p.order, folder_id(p.order, &p.name)));
        }

        // Resolve every entry and validate the combined graph before any
        // task file is written.
        let mut resolved: Vec<(u32, String, Vec<String>)> = Vec::with_capacity(planned.len());
        for p in planned {
            let deps =
                resolve_dependencies(&known, p.depends_on_orders.as_deref(), p.order)?;
            resolved.push((p.order, folder_id(p.order, &p.name), deps));
        }

        let mut nodes: Vec<TaskNode> = existing
            .iter()
            .map(|t| TaskNode {
                id: t.id.clone(),
                status: t.document.status,
                depends_on: t.document.depends_on.clone(),
            })
            .collect();
        nodes.extend(resolved.iter().map(|(_, id, deps)| TaskNode {
            id: id.clone(),
            status: TaskStatus::Pending,
            depends_on: deps.clone(),
        }));
        validate_dependency_graph(&nodes)?;

        let mut created = Vec::with_capacity(resolved.len());
        for ((order, id, deps), p) in resolved.into_iter().zip(planned) {
            let document = TaskDocument::new(TaskOrigin::Plan, deps);
            let path = self.task_dir(feature, &id);
            self.store
                .write_json_atomic(&path.join(STATUS_FILE), &document)?;
            created.push(TaskInfo {
                feature: feature.to_string(),
                name: p.name.clone(),
                id,
                order,
                path,
                document,
            });
        }
        info!(feature, count = created.len(), "plan imported");
        Ok(created)
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    /// All tasks of a feature, sorted by folder id (== creation order).
    pub async fn list(&self, feature: &str) -> Result<Vec<TaskInfo>, TaskError> {
        let engine = self.clone();
        let feature = feature.to_string();
        run_blocking(move || engine.scan_blocking(&feature)).await
    }

    /// Look up one task. Absence returns `Ok(None)`.
    pub async fn get(&self, feature: &str, id: &str) -> Result<Option<TaskInfo>, TaskError> {
        let engine = self.clone();
        let feature = feature.to_string();
        let id = id.to_string();
        run_blocking(move || engine.get_blocking(&feature, &id)).await
    }

    /// Partition the feature's pending tasks into runnable and blocked.
    pub async fn partition(&self, feature: &str) -> Result<TaskPartition, TaskError> {
        let tasks = self.list(feature).await?;
        let nodes: Vec<TaskNode> = tasks
            .iter()
            .map(|t| TaskNode {
                id: t.id.clone(),
                status: t.document.status,
                depends_on: t.document.depends_on.clone(),
            })
            .collect();
        Ok(compute_runnable_and_blocked(&nodes))
    }

    /// Ids of in-progress tasks whose last worker heartbeat is older than
    /// `timeout`. Tasks that never reported a heartbeat are not counted.
    pub fn find_stale_workers(
        tasks: &[TaskInfo],
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let cutoff = now - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
        tasks
            .iter()
            .filter(|t| t.document.status == TaskStatus::InProgress)
            .filter(|t| {
                t.document
                    .worker_session
                    .as_ref()
                    .and_then(|s| s.last_heartbeat_at)
                    .is_some_and(|hb| hb < cutoff)
            })
            .map(|t| t.id.clone())
            .collect()
    }

    fn scan_blocking(&self, feature: &str) -> Result<Vec<TaskInfo>, TaskError> {
        let tasks_dir = self.tasks_dir(feature);
        let entries = match std::fs::read_dir(&tasks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.get_blocking(feature, &id) {
                Ok(Some(info)) => tasks.push(info),
                Ok(None) => {}
                Err(TaskError::Store(StoreError::Json { path, source })) => {
                    // A corrupt document shouldn't hide the rest of the set.
                    warn!(path = %path.display(), err = %source, "skipping unreadable task document");
                }
                Err(e) => return Err(e),
            }
        }
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    fn get_blocking(&self, feature: &str, id: &str) -> Result<Option<TaskInfo>, TaskError> {
        let (order, slug) = match parse_folder_id(id) {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        let path = self.task_dir(feature, id);
        let document: TaskDocument = match self.store.read_json(&path.join(STATUS_FILE))? {
            Some(doc) => doc,
            None => return Ok(None),
        };
        Ok(Some(TaskInfo {
            feature: feature.to_string(),
            id: id.to_string(),
            name: slug.to_string(),
            order,
            path,
            document,
        }))
    }

    // ─── Mutation ─────────────────────────────────────────────────────────────

    /// Full locked update — the completion flow's write path and the only
    /// one allowed to change status, summary, and completedAt. Terminal
    /// statuses stamp `completedAt`. Returns the merged document, or `None`
    /// if the task does not exist.
    pub async fn update(
        &self,
        feature: &str,
        id: &str,
        update: TaskUpdate,
    ) -> Result<Option<TaskDocument>, TaskError> {
        let path = self.status_path(feature, id);
        if !path.exists() {
            return Ok(None);
        }

        let mut patch = match serde_json::to_value(&update) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let now = Utc::now();
        patch.insert("updatedAt".into(), timestamp(now));
        if update.status.is_some_and(TaskStatus::is_terminal) {
            patch.insert("completedAt".into(), timestamp(now));
        }

        let merged = self
            .store
            .patch_json_locked_async(&path, Value::Object(patch), None)
            .await?;
        debug!(feature, task = id, status = ?update.status, "task updated");
        Ok(Some(decode_document(&path, merged)?))
    }

    /// Restricted locked patch for background workers. Only
    /// `idempotencyKey` and `workerSession` survive filtering — a patch
    /// carrying status/summary/completedAt has those fields dropped, not
    /// applied. `workerSession` merges field-by-field, so a heartbeat-only
    /// patch preserves attempt, messageCount, etc.
    pub async fn patch_background_fields(
        &self,
        feature: &str,
        id: &str,
        patch: Value,
    ) -> Result<Option<TaskDocument>, TaskError> {
        let path = self.status_path(feature, id);
        if !path.exists() {
            return Ok(None);
        }

        let mut filtered = Map::new();
        if let Value::Object(map) = patch {
            for (key, value) in map {
                if BACKGROUND_FIELDS.contains(&key.as_str()) {
                    filtered.insert(key, value);
                }
            }
        }
        filtered.insert("updatedAt".into(), timestamp(Utc::now()));

        let merged = self
            .store
            .patch_json_locked_async(&path, Value::Object(filtered), None)
            .await?;
        Ok(Some(decode_document(&path, merged)?))
    }

    /// Write a task's rendered execution brief next to its status document.
    pub async fn write_brief(
        &self,
        feature: &str,
        id: &str,
        content: &str,
    ) -> Result<(), TaskError> {
        let engine = self.clone();
        let path = self.task_dir(feature, id).join(BRIEF_FILE);
        let content = content.to_string();
        run_blocking(move || {
            engine.store.write_atomic(&path, content.as_bytes())?;
            Ok(())
        })
        .await
    }

    // ─── Removal ──────────────────────────────────────────────────────────────

    /// Delete a task and its status document. Returns whether it existed.
    pub async fn remove(&self, feature: &str, id: &str) -> Result<bool, TaskError> {
        let dir = self.task_dir(feature, id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(feature, task = id, "task removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a feature's entire task tree (documents, briefs, locks).
    pub async fn cleanup_feature(&self, feature: &str) -> Result<(), TaskError> {
        let dir = self
            .root
            .join(".hive")
            .join("features")
            .join(feature);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(feature, "feature task tree removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn timestamp(t: DateTime<Utc>) -> Value {
    Value::String(t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}

fn decode_document(path: &std::path::Path, value: Value) -> Result<TaskDocument, TaskError> {
    serde_json::from_value(value).map_err(|source| {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskError::Io(std::io::Error::other(e)))?
}
