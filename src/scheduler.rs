//! Task scheduler (C8, spec §4.8): a single-process, single-writer,
//! cron-triggered claim/execute/retry loop.
//!
//! Grounded on the reference codebase's `FileWatcher` event loop (a tight
//! loop behind an `Arc<AtomicBool>` shutdown flag) and its `sync/git.rs` for
//! the repo-clone step; the claim/execute/retry state machine itself has no
//! reference-codebase analog and is built directly from spec §4.8.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::models::{new_id, NewTask, Task, TaskListFilters, TaskResult, TaskResultFilters, TaskStatus};
use crate::repo::task as task_repo;
use crate::storage::Handle;

/// What a `Runner` produced for a successfully-run task.
#[derive(Debug, Clone, Default)]
pub struct RunnerOutput {
    pub output: Option<String>,
    pub summary: Option<String>,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Pluggable task executor (spec §9 "Dynamic dispatch over runners"). All
/// concurrency contracts -- the caller applies the deadline, catches
/// panics, translates the result into the retry state machine -- live here
/// on the abstraction, not on any implementation.
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, task: &Task) -> Result<RunnerOutput>;
}

/// Calls a remote LM HTTP service with the task description and context.
pub struct HttpRunner {
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRunner {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[derive(serde::Serialize)]
struct HttpRunnerRequest<'a> {
    description: &'a str,
    task_type: &'a str,
    context: &'a Option<Value>,
}

#[derive(serde::Deserialize)]
struct HttpRunnerResponse {
    output: Option<String>,
    summary: Option<String>,
    tokens_used: Option<u64>,
    cost_usd: Option<f64>,
    error: Option<String>,
}

impl Runner for HttpRunner {
    fn name(&self) -> &str {
        "http"
    }

    fn run(&self, task: &Task) -> Result<RunnerOutput> {
        let body = HttpRunnerRequest {
            description: &task.description,
            task_type: task.task_type.as_str(),
            context: &task.context,
        };

        let mut request = ureq::post(&self.endpoint).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", &format!("Bearer {key}"));
        }

        let mut response = request
            .send_json(&body)
            .map_err(|e| anyhow::anyhow!("task runner HTTP call failed: {e}"))?;

        let parsed: HttpRunnerResponse = response
            .body_mut()
            .read_json()
            .context("failed to parse task runner response")?;

        if let Some(err) = parsed.error {
            anyhow::bail!("task runner reported an error: {err}");
        }

        Ok(RunnerOutput {
            output: parsed.output,
            summary: parsed.summary,
            tokens_used: parsed.tokens_used,
            cost_usd: parsed.cost_usd,
        })
    }
}

/// Invokes a CLI child process with the task description as its argument.
pub struct ProcessRunner {
    program: String,
    extra_args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }
}

impl Runner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    fn run(&self, task: &Task) -> Result<RunnerOutput> {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.extra_args).arg(&task.description);

        if let Some(clone_path) = task
            .context
            .as_ref()
            .and_then(|c| c.get("clone_path"))
            .and_then(|v| v.as_str())
        {
            command.current_dir(clone_path);
        }

        let output = command
            .output()
            .with_context(|| format!("spawning task runner process: {}", self.program))?;

        if !output.status.success() {
            anyhow::bail!(
                "task runner process exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(RunnerOutput {
            output: Some(String::from_utf8_lossy(&output.stdout).to_string()),
            summary: None,
            tokens_used: None,
            cost_usd: None,
        })
    }
}

/// Fixed-outcome runner used by tests and by `DESIGN.md`'s mock scenarios.
pub struct MockRunner {
    result: Mutex<Box<dyn FnMut(&Task) -> Result<RunnerOutput> + Send>>,
}

impl MockRunner {
    pub fn always_succeed() -> Self {
        Self {
            result: Mutex::new(Box::new(|_task| Ok(RunnerOutput::default()))),
        }
    }

    pub fn always_fail(message: impl Into<String> + Clone + Send + 'static) -> Self {
        Self {
            result: Mutex::new(Box::new(move |_task| {
                let msg: String = message.clone().into();
                anyhow::bail!("{msg}")
            })),
        }
    }

    pub fn from_fn(f: impl FnMut(&Task) -> Result<RunnerOutput> + Send + 'static) -> Self {
        Self {
            result: Mutex::new(Box::new(f)),
        }
    }
}

impl Runner for MockRunner {
    fn name(&self) -> &str {
        "mock"
    }

    fn run(&self, task: &Task) -> Result<RunnerOutput> {
        (self.result.lock().expect("mock runner poisoned"))(task)
    }
}

/// Shallow clone of a task's `repo_url`, removed on drop regardless of how
/// the caller exits (success, failure, timeout, panic).
struct ClonedRepo {
    path: PathBuf,
}

impl Drop for ClonedRepo {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to clean up task repo clone");
            }
        }
    }
}

fn shallow_clone(repo_url: &str) -> Result<ClonedRepo> {
    let dir = std::env::temp_dir().join(format!("codemem-task-{}", new_id()));

    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.depth(1);

    git2::build::RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(repo_url, &dir)
        .with_context(|| format!("shallow-cloning {repo_url}"))?;

    Ok(ClonedRepo { path: dir })
}

fn inject_clone_path(context: &Option<Value>, clone_path: &str) -> Value {
    let mut merged = context.clone().unwrap_or_else(|| Value::Object(Default::default()));
    if let Value::Object(map) = &mut merged {
        map.insert("clone_path".to_string(), Value::String(clone_path.to_string()));
    }
    merged
}

/// Scheduler run statistics (spec §4.8 `get_stats`).
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

type CompletionCallback = dyn Fn(&Task, &TaskResult) + Send + Sync;

/// The single-writer, cron-triggered task loop.
pub struct Scheduler {
    handle: Arc<Handle>,
    runner: Arc<dyn Runner>,
    cron_expr: String,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    stats: Arc<Mutex<SchedulerStats>>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    on_task_complete: Option<Arc<CompletionCallback>>,
}

impl Scheduler {
    pub fn new(handle: Arc<Handle>, runner: Arc<dyn Runner>, cron_expr: impl Into<String>) -> Self {
        Self {
            handle,
            runner,
            cron_expr: cron_expr.into(),
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            loop_handle: Mutex::new(None),
            on_task_complete: None,
        }
    }

    pub fn with_completion_callback(
        mut self,
        callback: impl Fn(&Task, &TaskResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_task_complete = Some(Arc::new(callback));
        self
    }

    pub fn add(&self, input: &NewTask) -> Result<Task> {
        let conn = self.handle.conn.lock().expect("db handle poisoned");
        task_repo::add(&conn, &new_id(), input)
    }

    pub fn list(&self, filters: &TaskListFilters) -> Result<Vec<Task>> {
        let conn = self.handle.conn.lock().expect("db handle poisoned");
        task_repo::list(&conn, filters)
    }

    pub fn get_results(&self, filters: &TaskResultFilters) -> Result<Vec<TaskResult>> {
        let conn = self.handle.conn.lock().expect("db handle poisoned");
        task_repo::get_results(&conn, filters)
    }

    pub fn cancel(&self, id: &str) -> Result<bool> {
        let conn = self.handle.conn.lock().expect("db handle poisoned");
        task_repo::cancel(&conn, id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.stats.lock().expect("stats mutex poisoned").clone()
    }

    /// Start the cron-triggered loop. Idempotent: a second call without an
    /// intervening `stop()` logs a warning and is a no-op. Also triggers
    /// one immediate pass, per spec §4.8.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler start() called while already running; ignoring");
            return;
        }

        let schedule = match cron::Schedule::from_str(&self.cron_expr) {
            Ok(s) => s,
            Err(e) => {
                error!(cron = %self.cron_expr, error = %e, "invalid scheduler cron expression");
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_one_pass().await;

            loop {
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }

                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(wait).await;

                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                this.run_one_pass().await;
            }
        });

        *self.loop_handle.lock().expect("loop handle mutex poisoned") = Some(handle);
        info!(cron = %self.cron_expr, "scheduler started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.lock().expect("loop handle mutex poisoned").take() {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    /// Claim and execute at most one pending task. Silently skipped if a
    /// task is already in flight (the re-entrancy guard of spec §4.8).
    async fn run_one_pass(self: &Arc<Self>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            info!("scheduler tick skipped: a task is already in flight");
            return;
        }

        let result = self.try_claim_and_run().await;
        if let Err(e) = result {
            error!(error = %e, "scheduler pass failed");
        }

        self.stats.lock().expect("stats mutex poisoned").last_run_at = Some(Utc::now());
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn try_claim_and_run(self: &Arc<Self>) -> Result<()> {
        let next = {
            let conn = self.handle.conn.lock().expect("db handle poisoned");
            task_repo::next_pending(&conn)?
        };

        let Some(task) = next else {
            return Ok(());
        };

        let claimed = {
            let conn = self.handle.conn.lock().expect("db handle poisoned");
            task_repo::claim(&conn, &task.id)?
        };
        if !claimed {
            return Ok(());
        }

        info!(task_id = %task.id, description = %task.description, "task claimed");
        self.execute_claimed_task(task).await
    }

    async fn execute_claimed_task(self: &Arc<Self>, mut task: Task) -> Result<()> {
        let deadline = Duration::from_millis(task.timeout_ms.max(1));

        let clone_guard = match &task.repo_url {
            Some(url) => match shallow_clone(url) {
                Ok(guard) => {
                    task.context = Some(inject_clone_path(&task.context, &guard.path.to_string_lossy()));
                    Some(guard)
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "repo clone failed, running without clone_path");
                    None
                }
            },
            None => None,
        };

        let started = std::time::Instant::now();
        let runner = Arc::clone(&self.runner);
        let task_for_run = task.clone();
        let join_handle = tokio::task::spawn_blocking(move || runner.run(&task_for_run));

        let timed_out = tokio::time::timeout(deadline, join_handle).await;
        drop(clone_guard);
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match timed_out {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_err)) => Err(format!("task runner panicked: {join_err}")),
            Err(_elapsed) => Err(format!("Task timed out after {}ms", task.timeout_ms)),
        };

        let (status, result) = {
            let conn_arc = Arc::clone(&self.handle);
            let mut conn = conn_arc.conn.lock().expect("db handle poisoned");

            match outcome {
                Ok(output) => {
                    let result = TaskResult {
                        id: new_id(),
                        task_id: task.id.clone(),
                        output: output.output,
                        summary: output.summary,
                        success: true,
                        error: None,
                        duration_ms,
                        tokens_used: output.tokens_used,
                        cost_usd: output.cost_usd,
                        memory_id: None,
                        created_at: Utc::now(),
                    };
                    task_repo::complete(&mut conn, &task.id, &result)?;
                    self.stats.lock().expect("stats mutex poisoned").tasks_completed += 1;
                    (TaskStatus::Completed, result)
                }
                Err(message) => {
                    let result = TaskResult {
                        id: new_id(),
                        task_id: task.id.clone(),
                        output: None,
                        summary: None,
                        success: false,
                        error: Some(message),
                        duration_ms,
                        tokens_used: None,
                        cost_usd: None,
                        memory_id: None,
                        created_at: Utc::now(),
                    };
                    let next_status = task_repo::fail(&mut conn, &task.id, &result)?;
                    if next_status == TaskStatus::Failed {
                        self.stats.lock().expect("stats mutex poisoned").tasks_failed += 1;
                    }
                    (next_status, result)
                }
            }
        };

        info!(task_id = %task.id, status = status.as_str(), "task execution finished");

        if let Some(callback) = &self.on_task_complete {
            let callback = Arc::clone(callback);
            let task = task.clone();
            let result = result.clone();
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&task, &result)
            })) {
                error!(task_id = %task.id, "on_task_complete callback panicked: {:?}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;
    use crate::storage;
    use tempfile::TempDir;

    fn test_handle() -> (TempDir, Arc<Handle>) {
        let dir = TempDir::new().unwrap();
        let handle = storage::open(&dir.path().join("sched.db"), None).unwrap();
        (dir, handle)
    }

    fn sample_task() -> NewTask {
        NewTask {
            description: "review the repo".to_string(),
            task_type: TaskType::CodeReview,
            project_id: None,
            repo_url: None,
            priority: 5,
            scheduled_for: None,
            context: None,
            timeout_ms: 5_000,
            max_retries: 1,
        }
    }

    #[tokio::test]
    async fn test_scheduler_retries_then_fails() {
        let (_dir, handle) = test_handle();
        let runner: Arc<dyn Runner> = Arc::new(MockRunner::always_fail("boom"));
        let scheduler = Arc::new(Scheduler::new(handle, runner, "0 0 0 1 1 *"));

        let task = scheduler.add(&sample_task()).unwrap();

        scheduler.try_claim_and_run().await.unwrap();
        let after_first = scheduler
            .list(&TaskListFilters { limit: 10, ..Default::default() })
            .unwrap()
            .into_iter()
            .find(|t| t.id == task.id)
            .unwrap();
        assert_eq!(after_first.status, TaskStatus::Pending);
        assert_eq!(after_first.retry_count, 1);

        scheduler.try_claim_and_run().await.unwrap();
        let after_second = scheduler
            .list(&TaskListFilters { limit: 10, ..Default::default() })
            .unwrap()
            .into_iter()
            .find(|t| t.id == task.id)
            .unwrap();
        assert_eq!(after_second.status, TaskStatus::Failed);
        assert_eq!(scheduler.get_stats().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_scheduler_completes_successfully() {
        let (_dir, handle) = test_handle();
        let runner: Arc<dyn Runner> = Arc::new(MockRunner::always_succeed());
        let scheduler = Arc::new(Scheduler::new(handle, runner, "0 0 0 1 1 *"));

        scheduler.add(&sample_task()).unwrap();
        scheduler.try_claim_and_run().await.unwrap();

        assert_eq!(scheduler.get_stats().tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_in_flight_guard_skips_concurrent_tick() {
        let (_dir, handle) = test_handle();
        let runner: Arc<dyn Runner> = Arc::new(MockRunner::always_succeed());
        let scheduler = Arc::new(Scheduler::new(handle, runner, "0 0 0 1 1 *"));

        scheduler.in_flight.store(true, Ordering::SeqCst);
        scheduler.run_one_pass().await;
        // No task existed anyway, but the in-flight guard path itself must
        // not panic and must leave the flag exactly as this test set it
        // (run_one_pass returns immediately without touching it).
        assert!(scheduler.in_flight.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_only_affects_pending() {
        let (_dir, handle) = test_handle();
        let runner: Arc<dyn Runner> = Arc::new(MockRunner::always_succeed());
        let scheduler = Scheduler::new(handle, runner, "0 0 0 1 1 *");

        let task = scheduler.add(&sample_task()).unwrap();
        assert!(scheduler.cancel(&task.id).unwrap());
        assert!(!scheduler.cancel(&task.id).unwrap());
    }
}
