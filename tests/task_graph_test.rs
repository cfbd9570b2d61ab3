//! Integration tests for the task graph engine: creation, plan import
//! atomicity, runnable/blocked partitioning, and the two write paths.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tempfile::TempDir;

use hive_core::store::DocumentStore;
use hive_core::tasks::{
    GraphError, TaskEngine, TaskError, TaskOrigin, TaskStatus, TaskUpdate,
};

/// Install the fmt subscriber once so `RUST_LOG` surfaces engine tracing.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn engine(root: &TempDir) -> TaskEngine {
    init_tracing();
    TaskEngine::new(root.path(), DocumentStore::default())
}

#[tokio::test]
async fn create_allocates_orders_and_implicit_dependencies() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    let first = eng
        .create("auth", "Set up schema", None, None, TaskOrigin::Manual)
        .await
        .expect("create first");
    assert_eq!(first.id, "01-set-up-schema");
    assert_eq!(first.order, 1);
    assert!(first.document.depends_on.is_empty());
    assert_eq!(first.document.status, TaskStatus::Pending);
    assert!(first.path.join("status.json").exists());

    // No explicit dependency: falls back to the preceding task.
    let second = eng
        .create("auth", "Add endpoints", None, None, TaskOrigin::Manual)
        .await
        .expect("create second");
    assert_eq!(second.order, 2);
    assert_eq!(second.document.depends_on, vec!["01-set-up-schema"]);

    // Explicitly empty: no dependencies at all.
    let third = eng
        .create("auth", "Write docs", None, Some(vec![]), TaskOrigin::Manual)
        .await
        .expect("create third");
    assert!(third.document.depends_on.is_empty());

    let listed = eng.list("auth").await.expect("list");
    assert_eq!(
        listed.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec!["01-set-up-schema", "02-add-endpoints", "03-write-docs"]
    );
}

#[tokio::test]
async fn duplicate_order_is_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    eng.create("f", "First", Some(1), None, TaskOrigin::Manual)
        .await
        .expect("create");
    let err = eng
        .create("f", "Clash", Some(1), None, TaskOrigin::Manual)
        .await
        .expect_err("duplicate order must fail");
    assert!(matches!(
        err,
        TaskError::Graph(GraphError::DuplicateOrder { order: 1 })
    ));
}

#[tokio::test]
async fn plan_import_creates_validated_graph() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    let plan = "\
1. Set up database schema
2. Implement API endpoints [depends: 1]
3. Write integration tests [depends: 1, 2]
4. Update changelog [depends: none]
";
    let created = eng.create_from_plan("auth", plan).await.expect("import");
    assert_eq!(created.len(), 4);
    assert_eq!(created[1].document.depends_on, vec!["01-set-up-database-schema"]);
    assert_eq!(
        created[2].document.depends_on,
        vec!["01-set-up-database-schema", "02-implement-api-endpoints"]
    );
    assert!(created[3].document.depends_on.is_empty());

    // The partition matches: only the tasks with no unmet deps are runnable.
    let partition = eng.partition("auth").await.expect("partition");
    assert_eq!(
        partition.runnable,
        vec!["01-set-up-database-schema", "04-update-changelog"]
    );
    assert_eq!(partition.blocked.len(), 2);
}

#[tokio::test]
async fn rejected_plan_writes_nothing() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    // 2 and 3 depend on each other: a cycle.
    let plan = "\
1. Base work
2. Left half [depends: 3]
3. Right half [depends: 2]
";
    let err = eng
        .create_from_plan("feat", plan)
        .await
        .expect_err("cycle must be rejected");
    assert!(matches!(
        err,
        TaskError::Graph(GraphError::CycleDetected { .. })
    ));

    // Pre-write validation: not even the acyclic first entry was created.
    assert!(eng.list("feat").await.expect("list").is_empty());
    let tasks_dir = tmp.path().join(".hive/features/feat/tasks");
    if tasks_dir.exists() {
        assert_eq!(std::fs::read_dir(&tasks_dir).unwrap().count(), 0);
    }
}

#[tokio::test]
async fn unknown_plan_reference_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    let err = eng
        .create_from_plan("feat", "1. Only task [depends: 9]")
        .await
        .expect_err("unknown order must be rejected");
    assert!(matches!(
        err,
        TaskError::Graph(GraphError::UnknownOrder { order: 9 })
    ));
    assert!(eng.list("feat").await.expect("list").is_empty());
}

#[tokio::test]
async fn completion_unblocks_dependents() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    eng.create_from_plan("feat", "1. First\n2. Second [depends: 1]")
        .await
        .expect("import");

    let partition = eng.partition("feat").await.expect("partition");
    assert_eq!(partition.runnable, vec!["01-first"]);
    assert!(partition.blocked.contains_key("02-second"));

    // Anything short of done keeps the dependent blocked.
    eng.update(
        "feat",
        "01-first",
        TaskUpdate {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
    )
    .await
    .expect("update")
    .expect("exists");
    let partition = eng.partition("feat").await.expect("partition");
    assert!(partition.blocked.contains_key("02-second"));

    let doc = eng
        .update(
            "feat",
            "01-first",
            TaskUpdate {
                status: Some(TaskStatus::Done),
                summary: Some("Done and dusted.".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(doc.status, TaskStatus::Done);
    assert_eq!(doc.summary.as_deref(), Some("Done and dusted."));
    assert!(doc.completed_at.is_some(), "terminal status stamps completedAt");

    let partition = eng.partition("feat").await.expect("partition");
    assert_eq!(partition.runnable, vec!["02-second"]);
    assert!(partition.blocked.is_empty());
}

#[tokio::test]
async fn update_on_missing_task_is_none() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    let result = eng
        .update("feat", "01-ghost", TaskUpdate::default())
        .await
        .expect("update");
    assert!(result.is_none());

    let result = eng
        .patch_background_fields("feat", "01-ghost", json!({}))
        .await
        .expect("patch");
    assert!(result.is_none());
}

#[tokio::test]
async fn background_patch_never_touches_completion_fields() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    eng.create("feat", "Work", None, None, TaskOrigin::Manual)
        .await
        .expect("create");
    eng.update(
        "feat",
        "01-work",
        TaskUpdate {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
    )
    .await
    .expect("update")
    .expect("exists");

    // A hostile patch carrying completion fields alongside legitimate ones.
    let doc = eng
        .patch_background_fields(
            "feat",
            "01-work",
            json!({
                "status": "done",
                "summary": "not mine to write",
                "completedAt": "2026-01-01T00:00:00Z",
                "idempotencyKey": "run-7",
                "workerSession": {"workerId": "w1", "attempt": 1}
            }),
        )
        .await
        .expect("patch")
        .expect("exists");

    assert_eq!(doc.status, TaskStatus::InProgress, "status must survive");
    assert!(doc.summary.is_none(), "summary must survive");
    assert!(doc.completed_at.is_none(), "completedAt must survive");
    assert_eq!(doc.idempotency_key.as_deref(), Some("run-7"));
    let session = doc.worker_session.expect("session written");
    assert_eq!(session.worker_id.as_deref(), Some("w1"));
    assert_eq!(session.attempt, Some(1));
}

#[tokio::test]
async fn heartbeat_patch_preserves_other_session_fields() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    eng.create("feat", "Work", None, None, TaskOrigin::Manual)
        .await
        .expect("create");
    eng.patch_background_fields(
        "feat",
        "01-work",
        json!({"workerSession": {"workerId": "w1", "attempt": 2, "messageCount": 14}}),
    )
    .await
    .expect("seed session")
    .expect("exists");

    let hb = Utc::now();
    let doc = eng
        .patch_background_fields(
            "feat",
            "01-work",
            json!({"workerSession": {"lastHeartbeatAt": hb.to_rfc3339()}}),
        )
        .await
        .expect("heartbeat")
        .expect("exists");

    let session = doc.worker_session.expect("session");
    assert!(session.last_heartbeat_at.is_some());
    // Object fields merge: the heartbeat did not clobber the rest.
    assert_eq!(session.worker_id.as_deref(), Some("w1"));
    assert_eq!(session.attempt, Some(2));
    assert_eq!(session.message_count, Some(14));
}

#[tokio::test]
async fn stale_workers_found_by_heartbeat_age() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    eng.create_from_plan("feat", "1. Alpha [depends: none]\n2. Beta [depends: none]\n3. Gamma [depends: none]")
        .await
        .expect("import");

    let now = Utc::now();
    for (id, heartbeat) in [
        ("01-alpha", now - ChronoDuration::minutes(30)),
        ("02-beta", now - ChronoDuration::seconds(5)),
    ] {
        eng.update(
            "feat",
            id,
            TaskUpdate {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("exists");
        eng.patch_background_fields(
            "feat",
            id,
            json!({"workerSession": {"lastHeartbeatAt": heartbeat.to_rfc3339()}}),
        )
        .await
        .expect("heartbeat")
        .expect("exists");
    }

    let tasks = eng.list("feat").await.expect("list");
    let stale =
        TaskEngine::find_stale_workers(&tasks, std::time::Duration::from_secs(600), now);
    assert_eq!(stale, vec!["01-alpha"]);
}

#[tokio::test]
async fn remove_and_cleanup() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    eng.create_from_plan("feat", "1. Alpha\n2. Beta")
        .await
        .expect("import");

    assert!(eng.remove("feat", "01-alpha").await.expect("remove"));
    assert!(!eng.remove("feat", "01-alpha").await.expect("remove again"));
    assert_eq!(eng.list("feat").await.expect("list").len(), 1);

    eng.cleanup_feature("feat").await.expect("cleanup");
    assert!(eng.list("feat").await.expect("list").is_empty());
    assert!(!tmp.path().join(".hive/features/feat").exists());
}

#[tokio::test]
async fn brief_written_next_to_status_document() {
    let tmp = TempDir::new().expect("tempdir");
    let eng = engine(&tmp);

    let info = eng
        .create("feat", "Alpha", None, None, TaskOrigin::Manual)
        .await
        .expect("create");
    eng.write_brief("feat", &info.id, "# Task brief\n\nDo the thing.\n")
        .await
        .expect("write brief");

    let brief = std::fs::read_to_string(info.path.join("spec.md")).expect("read brief");
    assert!(brief.starts_with("# Task brief"));
}
