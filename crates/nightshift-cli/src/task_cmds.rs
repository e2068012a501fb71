//! Task ingress and inspection commands.
//!
//! This is the reference ingress adapter: validation errors from the queue
//! API surface directly to the submitting user.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use nightshift_core::queue;
use nightshift_db::models::{NewTask, TaskPriority, TaskSource, TaskStatus};

pub async fn run_add(
    pool: &SqlitePool,
    prompt: &str,
    priority: &str,
    project: Option<&str>,
    depends_on: Option<i64>,
    max_iterations: Option<i64>,
    created_by: Option<&str>,
) -> Result<()> {
    let priority: TaskPriority = priority
        .parse()
        .with_context(|| format!("invalid priority: {priority}"))?;

    let created_by = created_by
        .map(str::to_owned)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_owned());

    let mut new = NewTask::new(prompt, created_by, TaskSource::Cli);
    new.priority = priority;
    new.project_path = project.map(str::to_owned);
    new.depends_on = depends_on;
    if let Some(max) = max_iterations {
        new.max_iterations = max;
    }

    let task = queue::create(pool, new).await?;
    println!("Task #{} queued ({} priority).", task.id, task.priority);
    Ok(())
}

pub async fn run_list(pool: &SqlitePool, status: Option<&str>, limit: i64) -> Result<()> {
    let status = status
        .map(|s| {
            s.parse::<TaskStatus>()
                .with_context(|| format!("invalid status: {s}"))
        })
        .transpose()?;

    let tasks = queue::list_tasks(pool, status, limit).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<8} {:<20} PROMPT", "ID", "STATUS", "PRIO", "CREATED");
    for task in &tasks {
        println!(
            "{:<6} {:<10} {:<8} {:<20} {}",
            task.id,
            task.status.to_string(),
            task.priority.to_string(),
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            snippet(&task.prompt, 60),
        );
    }
    Ok(())
}

pub async fn run_show(pool: &SqlitePool, id: i64) -> Result<()> {
    let task = queue::get_task(pool, id)
        .await?
        .with_context(|| format!("task {id} not found"))?;

    println!("Task #{}", task.id);
    println!("  status:      {}", task.status);
    println!("  priority:    {}", task.priority);
    println!("  source:      {} (by {})", task.source, task.created_by);
    println!("  created:     {}", task.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(path) = &task.project_path {
        println!("  project:     {path}");
    }
    if let Some(dep) = task.depends_on {
        println!("  depends on:  #{dep}");
    }
    println!(
        "  iterations:  {}/{}   retries: {}/{}",
        task.iteration, task.max_iterations, task.retry_count, task.max_retries
    );
    if let Some(session) = &task.session_id {
        println!("  session:     {session}");
    }
    if task.progress_tool_calls > 0 {
        println!(
            "  progress:    {} tool calls, last: {}",
            task.progress_tool_calls,
            task.progress_last_tool.as_deref().unwrap_or("-")
        );
    }
    if let Some(error) = &task.error {
        let kind = task
            .error_type
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        println!("  error:       [{kind}] {error}");
    }
    println!("  prompt:");
    for line in task.prompt.lines() {
        println!("    {line}");
    }
    if let Some(result) = &task.result {
        println!("  result:");
        for line in result.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}

pub async fn run_status(pool: &SqlitePool) -> Result<()> {
    let stats = queue::queue_stats(pool).await?;
    println!("Queue: {} total", stats.total);
    println!("  pending:   {}", stats.pending);
    println!("  running:   {}", stats.running);
    println!("  done:      {}", stats.done);
    println!("  failed:    {}", stats.failed);
    println!("  cancelled: {}", stats.cancelled);

    if let Some(running) = queue::get_running_task(pool).await? {
        println!();
        println!(
            "Running: #{} (iteration {}/{}) {}",
            running.id,
            running.iteration,
            running.max_iterations,
            snippet(&running.prompt, 60)
        );
    }
    Ok(())
}

pub async fn run_cancel(pool: &SqlitePool, id: i64) -> Result<()> {
    if queue::cancel_task(pool, id).await? {
        println!("Task #{id} cancelled.");
    } else {
        println!("Task #{id} is not pending; nothing to cancel.");
    }
    Ok(())
}

fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    }
}
