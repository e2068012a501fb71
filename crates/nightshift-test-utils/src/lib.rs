//! Shared test utilities for nightshift integration tests.
//!
//! SQLite is embedded, so every test gets its own in-memory database with
//! migrations applied -- full isolation with no external service.

use sqlx::SqlitePool;

use nightshift_db::models::{NewTask, Task, TaskPriority, TaskSource};
use nightshift_db::pool;
use nightshift_db::queries::tasks as task_db;

/// Create a fresh in-memory database with the schema applied.
pub async fn create_test_db() -> SqlitePool {
    pool::create_memory_pool()
        .await
        .expect("in-memory database should open")
}

/// Insert a task with the given prompt and priority, defaults elsewhere.
pub async fn seed_task(pool: &SqlitePool, prompt: &str, priority: TaskPriority) -> Task {
    let mut new = NewTask::new(prompt, "test", TaskSource::Cli);
    new.priority = priority;
    task_db::insert_task(pool, &new)
        .await
        .expect("seed task should insert")
}

/// Insert a task that depends on another.
pub async fn seed_dependent_task(pool: &SqlitePool, prompt: &str, parent_id: i64) -> Task {
    let mut new = NewTask::new(prompt, "test", TaskSource::Cli);
    new.depends_on = Some(parent_id);
    task_db::insert_task(pool, &new)
        .await
        .expect("dependent seed task should insert")
}
