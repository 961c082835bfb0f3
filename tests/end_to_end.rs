//! Full-pipeline integration tests driven through `tools::Core`, the same
//! boundary the MCP server calls. A hand-rolled HTTP double stands in for
//! the embedding provider and the task runner (no mock-server crate in the
//! dependency graph, so this mirrors it by hand): see `support::mock_server`.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use codemem_core::config::Config;
use codemem_core::scheduler::{HttpRunner, MockRunner, Scheduler};
use codemem_core::storage;
use codemem_core::tools::{self, Core, ListInput, SearchInput, SearchScope, StoreInput};

use support::mock_server::{spawn_embedding_server, spawn_runner_server};

fn test_core(embedding_api_base: &str) -> (tempfile::TempDir, Core) {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.embedding.api_base = embedding_api_base.to_string();
    config.embedding.model = "test-embed".to_string();

    let handle = storage::global_handle(&config.data_dir, None).unwrap();
    let runner = Arc::new(MockRunner::always_succeed());
    let scheduler = Arc::new(Scheduler::new(handle, runner, config.scheduler_cron.clone()));

    (dir, Core::new(config, scheduler))
}

#[test]
fn store_then_search_finds_the_memory() {
    let addr = spawn_embedding_server();
    let (_dir, core) = test_core(&addr);

    let stored = tools::store(
        &core,
        StoreInput {
            text: "Rust's ownership model prevents data races at compile time.".to_string(),
            tags: vec!["rust".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(stored.chunks, 1);
    assert_eq!(stored.deduplicated, None);

    let results = tools::search(
        &core,
        SearchInput {
            query: "rust ownership".to_string(),
            scope: SearchScope::Global,
            project: None,
            tags: Vec::new(),
            max_results: 10,
            min_score: 0.0,
            include_archived: false,
        },
    )
    .unwrap();

    assert!(
        results.results.iter().any(|r| r.memory.id == stored.id),
        "expected the stored memory to come back from search, got {:?}",
        results.results
    );
}

#[test]
fn storing_identical_content_twice_is_deduplicated() {
    let addr = spawn_embedding_server();
    let (_dir, core) = test_core(&addr);

    let content = "Always run `cargo fmt` before committing.".to_string();

    let first = tools::store(
        &core,
        StoreInput {
            text: content.clone(),
            is_rule: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(first.deduplicated, None);

    let second = tools::store(&core, StoreInput { text: content, is_rule: true, ..Default::default() }).unwrap();

    assert_eq!(second.id, first.id, "a near-exact duplicate should resolve to the existing memory");
    assert_eq!(second.deduplicated, Some(true));

    let fetched = tools::get(&core, &first.id, None).unwrap();
    assert!(fetched.is_rule);
    assert!(fetched.importance_score >= 0.9, "rule memories must keep importance >= 0.9");
}

#[test]
fn list_filters_by_tag() {
    let addr = spawn_embedding_server();
    let (_dir, core) = test_core(&addr);

    tools::store(
        &core,
        StoreInput {
            text: "React hooks replaced class component lifecycle methods.".to_string(),
            tags: vec!["frontend".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    tools::store(
        &core,
        StoreInput {
            text: "Postgres B-tree indexes speed up equality and range lookups.".to_string(),
            tags: vec!["database".to_string()],
            ..Default::default()
        },
    )
    .unwrap();

    let frontend_only = tools::list(
        &core,
        ListInput {
            tag: Some("frontend".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(frontend_only.memories.len(), 1);
    assert!(frontend_only.memories[0].tags.contains(&"frontend".to_string()));
}

#[test]
fn bulk_delete_requires_a_filter_and_confirmation() {
    let addr = spawn_embedding_server();
    let (_dir, core) = test_core(&addr);

    tools::store(&core, StoreInput { text: "disposable note".to_string(), ..Default::default() }).unwrap();

    let err = tools::bulk_delete(&core, tools::BulkDeleteInput::default()).unwrap_err();
    assert!(matches!(err, codemem_core::Error::Validation(_)));

    let deleted = tools::bulk_delete(
        &core,
        tools::BulkDeleteInput {
            project: None,
            tag: None,
            older_than: Some(chrono::Utc::now() + chrono::Duration::days(1)),
            confirm: true,
        },
    )
    .unwrap();
    assert_eq!(deleted, 1);
}

/// Exercises the scheduler's claim/execute/retry loop end-to-end: the mock
/// runner server fails the first attempt and succeeds on the second, so the
/// task must revisit `pending` once (spec §4.8 retry semantics) before
/// landing in `completed`.
#[tokio::test(flavor = "multi_thread")]
async fn scheduler_retries_a_failing_task_then_completes_it() {
    let embedding_addr = spawn_embedding_server();
    let (_dir, core) = test_core(&embedding_addr);

    let runner_addr = spawn_runner_server(1);
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.scheduler_cron = "* * * * * *".to_string();

    let handle = storage::global_handle(&config.data_dir, None).unwrap();
    let runner = Arc::new(HttpRunner::new(runner_addr, None));
    let scheduler = Arc::new(Scheduler::new(handle, runner, config.scheduler_cron.clone()));
    let core = Core::new(config, scheduler.clone());

    let added = tools::task_add(
        &core,
        tools::TaskAddInput {
            description: "flaky review task".to_string(),
            task_type: None,
            project: None,
            repo_url: None,
            priority: 5,
            scheduled_for: None,
            context: None,
            timeout_ms: Some(5_000),
        },
    )
    .unwrap();

    scheduler.start();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut final_status = None;
    while Instant::now() < deadline {
        let tasks = tools::task_list(&core, tools::TaskListInput::default()).unwrap();
        if let Some(task) = tasks.iter().find(|t| t.id == added.id) {
            if matches!(
                task.status,
                codemem_core::models::TaskStatus::Completed | codemem_core::models::TaskStatus::Failed
            ) {
                final_status = Some(task.status);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    scheduler.stop();

    assert_eq!(
        final_status,
        Some(codemem_core::models::TaskStatus::Completed),
        "task should complete after the runner's first failure is retried"
    );

    let results = tools::task_results(
        &core,
        tools::TaskResultsInput {
            task_id: Some(added.id),
            since: None,
            limit: 10,
        },
    )
    .unwrap();
    assert!(results.iter().any(|r| r.success));
}
