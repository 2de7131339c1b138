//! Integration tests for `PgTaskStore` against a real database.
//!
//! Run with `DATABASE_URL` pointing at a scratch PostgreSQL server and
//! `--ignored`.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use talkvid_core::status::{TaskStatus, ACTIVE_STATUSES};
use talkvid_core::store::TaskStore;
use talkvid_core::task::{LogEntry, NewTask, TaskPatch};
use talkvid_db::PgTaskStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_task(prompt: &str) -> NewTask {
    NewTask {
        prompt: prompt.to_string(),
        image_path: "/in/face.png".to_string(),
        audio_path: "/in/voice.wav".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_bootstrap_seeds_statuses(pool: PgPool) {
    talkvid_db::health_check(&pool).await.unwrap();

    let rows: Vec<(i16, String)> = sqlx::query_as("SELECT id, name FROM task_statuses ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    for status in TaskStatus::ALL {
        assert!(
            rows.contains(&(status.id(), status.as_str().to_string())),
            "missing seed row for {status}"
        );
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_create_and_get(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let id = store
        .create_task("video_20260101_000000_aaaaaaaa".into(), new_task("hello"))
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap().expect("task exists");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.prompt, "hello");
    assert!(task.logs.is_empty());
    assert!(store.get_task("missing").await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_conditional_update_is_compare_and_set(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let id = store.create_task("t1".into(), new_task("a")).await.unwrap();

    let claim = TaskPatch {
        status: Some(TaskStatus::Processing),
        started_at: Some(Utc::now()),
        ..TaskPatch::default()
    };
    assert!(store
        .update_task_fields_if(&id, &[TaskStatus::Pending], claim.clone())
        .await
        .unwrap());
    assert!(!store
        .update_task_fields_if(&id, &[TaskStatus::Pending], claim)
        .await
        .unwrap());

    let active = store.list_tasks_by_status(&ACTIVE_STATUSES).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_ended_at_is_set_once(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let id = store.create_task("t1".into(), new_task("a")).await.unwrap();
    let first = Utc::now() - Duration::seconds(60);

    store
        .update_task_fields(&id, TaskPatch::terminal(TaskStatus::Failed, first, None, None))
        .await
        .unwrap();
    store
        .update_task_fields(
            &id,
            TaskPatch::terminal(TaskStatus::Failed, Utc::now(), None, None),
        )
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap().unwrap();
    let ended = task.ended_at.expect("ended_at");
    assert!((ended - first).num_milliseconds().abs() < 5);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_append_log_preserves_order(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let id = store.create_task("t1".into(), new_task("a")).await.unwrap();
    for message in ["queued", "launching", "generating"] {
        store
            .append_log(
                &id,
                LogEntry {
                    timestamp: Utc::now(),
                    level: "INFO".into(),
                    message: message.into(),
                },
            )
            .await
            .unwrap();
    }
    let task = store.get_task(&id).await.unwrap().unwrap();
    let messages: Vec<&str> = task.logs.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["queued", "launching", "generating"]);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_retention_removes_old_terminal_rows(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let old = store.create_task("old".into(), new_task("a")).await.unwrap();
    let live = store.create_task("live".into(), new_task("b")).await.unwrap();

    store
        .update_task_fields(
            &old,
            TaskPatch::terminal(TaskStatus::Success, Utc::now() - Duration::days(9), None, None),
        )
        .await
        .unwrap();
    store
        .update_task_fields(&live, TaskPatch::status(TaskStatus::Running))
        .await
        .unwrap();

    let removed = store
        .delete_terminal_older_than(Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_task(&live).await.unwrap().is_some());
}
