//! Integration tests for the task queue queries.
//!
//! Each test gets its own in-memory database with migrations applied, so
//! tests are fully isolated and need no external service.

use nightshift_db::models::{ErrorKind, NewTask, TaskPriority, TaskSource, TaskStatus};
use nightshift_db::queries::tasks as db;
use nightshift_db::queries::tasks::ProgressUpdate;

use nightshift_test_utils::{create_test_db, seed_dependent_task, seed_task};

// ---------------------------------------------------------------------------
// Insert / fetch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insert_assigns_monotonic_ids_and_defaults() {
    let pool = create_test_db().await;

    let a = seed_task(&pool, "first", TaskPriority::Medium).await;
    let b = seed_task(&pool, "second", TaskPriority::Medium).await;

    assert!(b.id > a.id);
    assert_eq!(a.status, TaskStatus::Pending);
    assert_eq!(a.iteration, 0);
    assert_eq!(a.retry_count, 0);
    assert_eq!(a.max_iterations, 10);
    assert_eq!(a.max_retries, 3);
    assert!(a.session_id.is_none());
    assert!(a.started_at.is_none());
}

#[tokio::test]
async fn prompt_roundtrips_exactly() {
    let pool = create_test_db().await;

    let prompt = "fix the flaky test in auth/session.rs\n\nIt fails on cold caches.";
    let task = seed_task(&pool, prompt, TaskPriority::High).await;

    let fetched = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(fetched.prompt, prompt);
}

#[tokio::test]
async fn get_missing_task_is_none() {
    let pool = create_test_db().await;
    assert!(db::get_task(&pool, 12345).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Priority-FIFO ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn urgent_beats_earlier_low_and_high() {
    let pool = create_test_db().await;

    // Insert in order: low, urgent, high.
    seed_task(&pool, "Low", TaskPriority::Low).await;
    let urgent = seed_task(&pool, "Urgent", TaskPriority::Urgent).await;
    seed_task(&pool, "High", TaskPriority::High).await;

    let next = db::get_next_retryable(&pool).await.unwrap().unwrap();
    assert_eq!(next.id, urgent.id);
    assert_eq!(next.prompt, "Urgent");
}

#[tokio::test]
async fn equal_priority_is_fifo() {
    let pool = create_test_db().await;

    let first = seed_task(&pool, "older", TaskPriority::Medium).await;
    seed_task(&pool, "newer", TaskPriority::Medium).await;

    let next = db::get_next_retryable(&pool).await.unwrap().unwrap();
    assert_eq!(next.id, first.id);
}

#[tokio::test]
async fn empty_queue_returns_none() {
    let pool = create_test_db().await;
    assert!(db::get_next_retryable(&pool).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Eligibility: retry_after and dependencies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn future_retry_after_makes_task_ineligible() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "deferred", TaskPriority::Urgent).await;
    assert!(db::schedule_retry(&pool, task.id, 3600).await.unwrap());

    assert!(db::get_next_retryable(&pool).await.unwrap().is_none());
}

#[tokio::test]
async fn elapsed_retry_after_is_eligible_again() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "due", TaskPriority::Medium).await;
    // Zero delay: retry_after == now, which has elapsed by query time.
    assert!(db::schedule_retry(&pool, task.id, 0).await.unwrap());

    let next = db::get_next_retryable(&pool).await.unwrap().unwrap();
    assert_eq!(next.id, task.id);
}

#[tokio::test]
async fn unmet_dependency_gates_child() {
    let pool = create_test_db().await;

    let parent = seed_task(&pool, "parent", TaskPriority::Low).await;
    let child = seed_dependent_task(&pool, "child", parent.id).await;

    // Parent is eligible, child is not -- even though both are pending.
    let next = db::get_next_retryable(&pool).await.unwrap().unwrap();
    assert_eq!(next.id, parent.id);

    // Parent done: child becomes eligible.
    db::set_running(&pool, parent.id, "sess-p").await.unwrap();
    db::set_done(&pool, parent.id, "parent output").await.unwrap();

    let next = db::get_next_retryable(&pool).await.unwrap().unwrap();
    assert_eq!(next.id, child.id);
}

#[tokio::test]
async fn failed_dependency_keeps_child_ineligible() {
    let pool = create_test_db().await;

    let parent = seed_task(&pool, "parent", TaskPriority::Medium).await;
    let child = seed_dependent_task(&pool, "child", parent.id).await;

    db::set_running(&pool, parent.id, "sess-p").await.unwrap();
    db::set_failed(&pool, parent.id, "boom", ErrorKind::Unknown)
        .await
        .unwrap();

    // A failed parent never satisfies the gate.
    assert!(db::get_next_retryable(&pool).await.unwrap().is_none());
    let child = db::get_task(&pool, child.id).await.unwrap().unwrap();
    assert_eq!(child.status, TaskStatus::Pending);
}

// ---------------------------------------------------------------------------
// Dependency cascade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cascade_fails_pending_children_only() {
    let pool = create_test_db().await;

    let parent = seed_task(&pool, "parent", TaskPriority::Medium).await;
    let child_a = seed_dependent_task(&pool, "child a", parent.id).await;
    let child_b = seed_dependent_task(&pool, "child b", parent.id).await;
    let done_child = seed_dependent_task(&pool, "already done", parent.id).await;
    db::set_running(&pool, done_child.id, "sess-d").await.unwrap();
    db::set_done(&pool, done_child.id, "out").await.unwrap();

    db::set_running(&pool, parent.id, "sess-p").await.unwrap();
    db::set_failed(&pool, parent.id, "boom", ErrorKind::Timeout)
        .await
        .unwrap();
    let cascaded = db::fail_dependent_tasks(&pool, parent.id, "parent failed")
        .await
        .unwrap();
    assert_eq!(cascaded, 2);

    for id in [child_a.id, child_b.id] {
        let child = db::get_task(&pool, id).await.unwrap().unwrap();
        assert_eq!(child.status, TaskStatus::Failed);
        assert_eq!(child.error_type, Some(ErrorKind::DependencyFailed));
        assert_eq!(child.error.as_deref(), Some("parent failed"));
        assert!(child.completed_at.is_some());
    }

    // The already-done child is untouched.
    let untouched = db::get_task(&pool, done_child.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Done);
}

#[tokio::test]
async fn dependent_tasks_lists_pending_children() {
    let pool = create_test_db().await;

    let parent = seed_task(&pool, "parent", TaskPriority::Medium).await;
    seed_dependent_task(&pool, "c1", parent.id).await;
    seed_dependent_task(&pool, "c2", parent.id).await;

    let children = db::get_dependent_tasks(&pool, parent.id).await.unwrap();
    assert_eq!(children.len(), 2);
}

// ---------------------------------------------------------------------------
// Retry scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_count_increases_until_budget_is_spent() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "flaky", TaskPriority::Medium).await;
    assert_eq!(task.max_retries, 3);

    // Three retries succeed, monotonic counter.
    for expected in 1..=3 {
        assert!(db::schedule_retry(&pool, task.id, 0).await.unwrap());
        let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(t.retry_count, expected);
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.iteration, 0);
        assert!(t.session_id.is_none());
        assert!(t.error.is_none());
    }

    // The fourth is refused and changes nothing.
    assert!(!db::schedule_retry(&pool, task.id, 0).await.unwrap());
    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.retry_count, 3);
}

#[tokio::test]
async fn schedule_retry_clears_execution_state() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "restartable", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-1").await.unwrap();
    db::increment_iteration(&pool, task.id).await.unwrap();

    assert!(db::schedule_retry(&pool, task.id, 60).await.unwrap());

    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Pending);
    assert_eq!(t.iteration, 0);
    assert!(t.session_id.is_none());
    assert!(t.started_at.is_none());
    assert!(t.retry_after.is_some());
}

#[tokio::test]
async fn retry_refused_for_terminal_task() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "finished", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-1").await.unwrap();
    db::set_done(&pool, task.id, "out").await.unwrap();

    assert!(!db::schedule_retry(&pool, task.id, 0).await.unwrap());
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_and_done_stamp_timestamps() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "stamped", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-9").await.unwrap();

    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Running);
    assert_eq!(t.session_id.as_deref(), Some("sess-9"));
    assert!(t.started_at.is_some());
    assert!(t.completed_at.is_none());

    db::set_done(&pool, task.id, "all good").await.unwrap();
    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Done);
    assert_eq!(t.result.as_deref(), Some("all good"));
    assert!(t.completed_at.is_some());
}

#[tokio::test]
async fn set_failed_records_classification() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "doomed", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-1").await.unwrap();
    db::set_failed(&pool, task.id, "context length exceeded", ErrorKind::ContextExceeded)
        .await
        .unwrap();

    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.error_type, Some(ErrorKind::ContextExceeded));
    assert_eq!(t.error.as_deref(), Some("context length exceeded"));
}

#[tokio::test]
async fn at_most_one_running_is_observable() {
    let pool = create_test_db().await;

    assert!(db::get_running_task(&pool).await.unwrap().is_none());

    let task = seed_task(&pool, "solo", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-1").await.unwrap();

    let running = db::get_running_task(&pool).await.unwrap().unwrap();
    assert_eq!(running.id, task.id);
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_succeeds_once_and_only_while_pending() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "cancellable", TaskPriority::Medium).await;
    assert!(db::cancel_task(&pool, task.id).await.unwrap());

    // Second cancel is a no-op.
    assert!(!db::cancel_task(&pool, task.id).await.unwrap());

    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Cancelled);
    assert!(t.completed_at.is_some());
}

#[tokio::test]
async fn cancel_does_not_touch_running_task() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "busy", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-1").await.unwrap();

    assert!(!db::cancel_task(&pool, task.id).await.unwrap());
    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Running);
}

// ---------------------------------------------------------------------------
// Orphan recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_to_pending_clears_execution_state() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "orphan", TaskPriority::Medium).await;
    db::set_running(&pool, task.id, "sess-1").await.unwrap();
    db::increment_iteration(&pool, task.id).await.unwrap();
    db::increment_iteration(&pool, task.id).await.unwrap();

    db::reset_to_pending(&pool, task.id).await.unwrap();

    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Pending);
    assert_eq!(t.iteration, 0);
    assert!(t.session_id.is_none());
    assert!(t.started_at.is_none());
    // Retry budget is untouched by recovery.
    assert_eq!(t.retry_count, 0);
}

// ---------------------------------------------------------------------------
// Progress and iteration counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn increment_iteration_returns_new_value() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "stepper", TaskPriority::Medium).await;
    assert_eq!(db::increment_iteration(&pool, task.id).await.unwrap(), 1);
    assert_eq!(db::increment_iteration(&pool, task.id).await.unwrap(), 2);
}

#[tokio::test]
async fn progress_update_truncates_long_messages() {
    let pool = create_test_db().await;

    let task = seed_task(&pool, "chatty", TaskPriority::Medium).await;
    let progress = ProgressUpdate {
        tool_calls: 7,
        last_tool: Some("bash".to_owned()),
        last_message: Some("x".repeat(5000)),
    };
    db::update_progress(&pool, task.id, &progress).await.unwrap();

    let t = db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.progress_tool_calls, 7);
    assert_eq!(t.progress_last_tool.as_deref(), Some("bash"));
    assert_eq!(t.progress_last_message.unwrap().chars().count(), 1000);
    assert!(t.progress_updated_at.is_some());
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_by_status_and_limits() {
    let pool = create_test_db().await;

    for i in 0..5 {
        seed_task(&pool, &format!("task {i}"), TaskPriority::Medium).await;
    }
    let done = seed_task(&pool, "finished", TaskPriority::Medium).await;
    db::set_running(&pool, done.id, "sess-1").await.unwrap();
    db::set_done(&pool, done.id, "out").await.unwrap();

    let pending = db::list_tasks(&pool, Some(TaskStatus::Pending), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 5);

    let limited = db::list_tasks(&pool, None, 3).await.unwrap();
    assert_eq!(limited.len(), 3);

    let done_rows = db::list_tasks(&pool, Some(TaskStatus::Done), 10)
        .await
        .unwrap();
    assert_eq!(done_rows.len(), 1);
}

#[tokio::test]
async fn stats_count_by_status() {
    let pool = create_test_db().await;

    seed_task(&pool, "p1", TaskPriority::Medium).await;
    seed_task(&pool, "p2", TaskPriority::Medium).await;
    let cancelled = seed_task(&pool, "c", TaskPriority::Medium).await;
    db::cancel_task(&pool, cancelled.id).await.unwrap();
    let failed = seed_task(&pool, "f", TaskPriority::Medium).await;
    db::set_running(&pool, failed.id, "s").await.unwrap();
    db::set_failed(&pool, failed.id, "e", ErrorKind::Unknown)
        .await
        .unwrap();

    let stats = db::queue_stats(&pool).await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.total, 4);
}

// ---------------------------------------------------------------------------
// NewTask knobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn custom_limits_are_stored() {
    let pool = create_test_db().await;

    let mut new = NewTask::new("custom", "alice", TaskSource::Slack);
    new.max_iterations = 2;
    new.max_retries = 0;
    new.project_path = Some("/home/dev/api".to_owned());
    let task = db::insert_task(&pool, &new).await.unwrap();

    assert_eq!(task.max_iterations, 2);
    assert_eq!(task.max_retries, 0);
    assert_eq!(task.source, TaskSource::Slack);
    assert_eq!(task.created_by, "alice");
    assert_eq!(task.project_path.as_deref(), Some("/home/dev/api"));
}
