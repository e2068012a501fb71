//! Executor integration tests against a scripted mock runner.
//!
//! The mock plays back one "round" per prompt: a status sequence, a
//! transcript, and a todo list. No subprocesses, no network.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use nightshift_core::classify;
use nightshift_core::executor::{Executor, ExecutorConfig};
use nightshift_core::runner::types::RunnerError;
use nightshift_core::runner::{Message, Part, Role, Runner, SessionStatus, Todo, TodoStatus};
use nightshift_db::models::{ErrorKind, NewTask, Task, TaskSource};
use nightshift_db::queries::tasks as task_db;
use nightshift_test_utils::create_test_db;

// ===========================================================================
// Mock runner
// ===========================================================================

/// One prompt/response round in the script.
#[derive(Clone, Default)]
struct Round {
    /// Statuses returned by successive get_status calls; the last repeats.
    statuses: Vec<SessionStatus>,
    messages: Vec<Message>,
    todos: Vec<Todo>,
    /// When set, send_prompt fails with this runner error instead.
    send_error: Option<String>,
}

struct MockRunner {
    rounds: Mutex<VecDeque<Round>>,
    current: Mutex<Option<(Round, usize)>>,
    sessions_created: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockRunner {
    fn new(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            current: Mutex::new(None),
            sessions_created: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    async fn prompts_seen(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_session(&self, _work_dir: &Path, _title: &str) -> Result<String> {
        let n = self.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("sess-{n}"))
    }

    async fn send_prompt(
        &self,
        _session_id: &str,
        _work_dir: &Path,
        _agent: &str,
        text: &str,
    ) -> Result<()> {
        self.prompts.lock().await.push(text.to_owned());
        let round = self
            .rounds
            .lock()
            .await
            .pop_front()
            .expect("script ran out of rounds");
        if let Some(message) = &round.send_error {
            return Err(RunnerError::new(message.clone()).into());
        }
        *self.current.lock().await = Some((round, 0));
        Ok(())
    }

    async fn get_status(&self, _session_id: &str, _work_dir: &Path) -> Result<SessionStatus> {
        let mut current = self.current.lock().await;
        let Some((round, index)) = current.as_mut() else {
            return Ok(SessionStatus::Idle);
        };
        let status = round
            .statuses
            .get(*index)
            .or(round.statuses.last())
            .copied()
            .unwrap_or(SessionStatus::Idle);
        *index += 1;
        Ok(status)
    }

    async fn get_messages(&self, _session_id: &str, _work_dir: &Path) -> Result<Vec<Message>> {
        Ok(self
            .current
            .lock()
            .await
            .as_ref()
            .map(|(round, _)| round.messages.clone())
            .unwrap_or_default())
    }

    async fn get_todos(&self, _session_id: &str) -> Result<Vec<Todo>> {
        Ok(self
            .current
            .lock()
            .await
            .as_ref()
            .map(|(round, _)| round.todos.clone())
            .unwrap_or_default())
    }

    async fn inject_tool_results(
        &self,
        _session_id: &str,
        _work_dir: &Path,
        _pending_tool_ids: &[String],
    ) -> Result<()> {
        Ok(())
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn assistant_text(text: &str) -> Message {
    Message {
        role: Role::Assistant,
        parts: vec![Part::Text {
            text: text.to_owned(),
        }],
    }
}

fn assistant_tool(id: &str, name: &str) -> Message {
    Message {
        role: Role::Assistant,
        parts: vec![Part::ToolUse {
            id: id.to_owned(),
            name: name.to_owned(),
        }],
    }
}

fn todo(status: TodoStatus) -> Todo {
    Todo {
        status,
        content: String::new(),
    }
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        iteration_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
        loop_pause: Duration::from_millis(5),
        session_warmup: Duration::ZERO,
        stability_min_age: Duration::ZERO,
        stability_polls: 3,
    }
}

fn executor(pool: &SqlitePool, runner: Arc<MockRunner>, config: ExecutorConfig) -> Executor {
    Executor::new(
        pool.clone(),
        runner,
        config,
        "coder".to_owned(),
        Vec::new(),
    )
}

async fn seed(pool: &SqlitePool, prompt: &str, max_iterations: i64) -> Task {
    let mut new = NewTask::new(prompt, "test", TaskSource::Cli);
    new.max_iterations = max_iterations;
    task_db::insert_task(pool, &new).await.unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn completes_in_a_single_iteration() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        statuses: vec![SessionStatus::Idle],
        messages: vec![assistant_text("[TASK_COMPLETE] Renamed the module.")],
        ..Default::default()
    }]);
    let exec = executor(&pool, runner.clone(), fast_config());

    let task = seed(&pool, "rename the module", 10).await;
    let output = exec.run_task(&task, Path::new(".")).await.unwrap();

    assert!(output.contains("[TASK_COMPLETE]"));
    assert_eq!(runner.sessions_created.load(Ordering::SeqCst), 1);

    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.iteration, 1);
    assert_eq!(t.session_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn continues_in_same_session_until_marker() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![
        Round {
            statuses: vec![SessionStatus::Idle],
            messages: vec![assistant_text("First, I'll map out the modules.")],
            todos: vec![todo(TodoStatus::InProgress)],
            ..Default::default()
        },
        Round {
            statuses: vec![SessionStatus::Idle],
            messages: vec![
                assistant_text("First, I'll map out the modules."),
                assistant_text("[TASK_COMPLETE] Mapped and refactored."),
            ],
            todos: vec![todo(TodoStatus::Completed)],
            ..Default::default()
        },
    ]);
    let exec = executor(&pool, runner.clone(), fast_config());

    let task = seed(&pool, "refactor", 10).await;
    let output = exec.run_task(&task, Path::new(".")).await.unwrap();

    assert!(output.contains("[TASK_COMPLETE]"));
    // One session across both iterations.
    assert_eq!(runner.sessions_created.load(Ordering::SeqCst), 1);

    let prompts = runner.prompts_seen().await;
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("refactor"));
    assert!(prompts[1].contains("Resume any pending todos"));

    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.iteration, 2);
}

#[tokio::test]
async fn max_iterations_returns_sentinel_result() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        statuses: vec![SessionStatus::Idle],
        messages: vec![assistant_text("Working on it. I need to keep going.")],
        ..Default::default()
    }]);
    let exec = executor(&pool, runner.clone(), fast_config());

    let task = seed(&pool, "endless", 1).await;
    let output = exec.run_task(&task, Path::new(".")).await.unwrap();

    assert!(output.starts_with("Max iterations reached. Last output:\n"));
    assert!(output.contains("Working on it."));
    assert_eq!(runner.prompts_seen().await.len(), 1);
}

#[tokio::test]
async fn open_todos_force_continuation_despite_completion_claim() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![
        Round {
            statuses: vec![SessionStatus::Idle],
            messages: vec![assistant_text("Task completed.")],
            todos: vec![todo(TodoStatus::Completed), todo(TodoStatus::Todo)],
            ..Default::default()
        },
        Round {
            statuses: vec![SessionStatus::Idle],
            messages: vec![assistant_text("Task completed.")],
            todos: vec![todo(TodoStatus::Completed), todo(TodoStatus::Cancelled)],
            ..Default::default()
        },
    ]);
    let exec = executor(&pool, runner.clone(), fast_config());

    let task = seed(&pool, "with todos", 10).await;
    exec.run_task(&task, Path::new(".")).await.unwrap();

    // The open todo in round one forced a second prompt.
    assert_eq!(runner.prompts_seen().await.len(), 2);
}

#[tokio::test]
async fn stable_busy_transcript_counts_as_idle() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        // Never reports idle; the stability heuristic has to fire.
        statuses: vec![SessionStatus::Busy],
        messages: vec![
            assistant_tool("t1", "bash"),
            assistant_text("[TASK_COMPLETE] Done without idle."),
        ],
        ..Default::default()
    }]);
    let exec = executor(&pool, runner.clone(), fast_config());

    let task = seed(&pool, "no idle signal", 10).await;
    let output = exec.run_task(&task, Path::new(".")).await.unwrap();
    assert!(output.contains("Done without idle"));

    // Busy polls persisted progress along the way.
    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.progress_tool_calls, 1);
    assert_eq!(t.progress_last_tool.as_deref(), Some("bash"));
    assert!(t.progress_updated_at.is_some());
}

#[tokio::test]
async fn iteration_deadline_raises_timeout() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        statuses: vec![SessionStatus::Busy],
        messages: vec![assistant_text("still going")],
        ..Default::default()
    }]);
    let config = ExecutorConfig {
        iteration_timeout: Duration::from_millis(50),
        // Keep the stability heuristic out of this test's way.
        stability_polls: 10_000,
        ..fast_config()
    };
    let exec = executor(&pool, runner, config);

    let task = seed(&pool, "hangs", 10).await;
    let err = exec.run_task(&task, Path::new(".")).await.unwrap_err();

    assert!(err.to_string().contains("timed out"), "{err:#}");
    assert_eq!(classify::classify(&err).kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn idle_with_no_output_is_not_believed() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        statuses: vec![SessionStatus::Idle],
        messages: vec![],
        ..Default::default()
    }]);
    let config = ExecutorConfig {
        iteration_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let exec = executor(&pool, runner, config);

    let task = seed(&pool, "silent", 10).await;
    // Idle with an empty transcript keeps polling until the deadline.
    let err = exec.run_task(&task, Path::new(".")).await.unwrap_err();
    assert_eq!(classify::classify(&err).kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn fresh_session_idle_is_ignored_during_warmup() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        statuses: vec![SessionStatus::Idle],
        messages: vec![assistant_text("[TASK_COMPLETE] quick win")],
        ..Default::default()
    }]);
    let config = ExecutorConfig {
        session_warmup: Duration::from_millis(100),
        ..fast_config()
    };
    let exec = executor(&pool, runner, config);

    let task = seed(&pool, "fast", 10).await;
    let start = Instant::now();
    let output = exec.run_task(&task, Path::new(".")).await.unwrap();

    assert!(output.contains("quick win"));
    // The early idle reports inside the warmup window were ignored.
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn send_prompt_failure_propagates_classified() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        send_error: Some("rate limit exceeded, slow down".to_owned()),
        ..Default::default()
    }]);
    let exec = executor(&pool, runner, fast_config());

    let task = seed(&pool, "unlucky", 10).await;
    let err = exec.run_task(&task, Path::new(".")).await.unwrap_err();
    assert_eq!(classify::classify(&err).kind, ErrorKind::RateLimit);

    // The session was created and persisted before the failure.
    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.session_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn blocked_agent_finishes_with_its_output() {
    let pool = create_test_db().await;
    let runner = MockRunner::new(vec![Round {
        statuses: vec![SessionStatus::Idle],
        messages: vec![assistant_text(
            "I scaffolded the service. What would you like the endpoint named?",
        )],
        ..Default::default()
    }]);
    let exec = executor(&pool, runner.clone(), fast_config());

    let task = seed(&pool, "scaffold", 10).await;
    let output = exec.run_task(&task, Path::new(".")).await.unwrap();

    // Stopping phrase: not complete, but no continuation either.
    assert!(output.contains("What would you like"));
    assert_eq!(runner.prompts_seen().await.len(), 1);
}
