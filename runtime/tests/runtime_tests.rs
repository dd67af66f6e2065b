//! Runtime behaviour against the in-memory engine: timeouts, retries of
//! injected transient faults, shutdown, and metrics export.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_data_core::effect::Effect;
use composable_data_core::error::DataError;
use composable_data_core::paging::{paginate, PageRequest, SortKey};
use composable_data_core::repository::{add, count, find_all};
use composable_data_core::specification::Specification;
use composable_data_core::unit_of_work::{in_transaction, save_changes};
use composable_data_runtime::metrics::MetricsServer;
use composable_data_runtime::retry::RetryPolicy;
use composable_data_runtime::{Runtime, RuntimeConfig};
use composable_data_testing::fixtures::{sample_todos, Todo, TodoAppEnv};
use composable_data_testing::{InMemoryDatabase, StorageOp};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn fast_retries(max_retries: u32) -> RuntimeConfig {
    RuntimeConfig::default().with_retry_policy(
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
    )
}

fn seeded(count: i64) -> InMemoryDatabase {
    composable_data_testing::init_test_tracing();
    let db = InMemoryDatabase::new();
    db.seed(sample_todos(count)).unwrap();
    db
}

fn pause(millis: u64) -> Effect<TodoAppEnv, ()> {
    Effect::new(move |_| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    })
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_runtime_pages_through_environment() {
    let db = seeded(25);
    let runtime = Runtime::new(TodoAppEnv::in_memory(&db));

    let request = PageRequest::new(2, 10, SortKey::<Todo>::by_id()).unwrap();
    let page = runtime.run(paginate(Specification::all(), request)).await.unwrap();

    assert_eq!(page.items().first().map(|t| t.id), Some(11));
    assert_eq!(page.total_count(), 25);
    assert!(page.has_next_page());
}

#[tokio::test]
async fn test_concurrent_runs_use_separate_sessions() {
    let db = seeded(0);
    let runtime = Runtime::new(TodoAppEnv::in_memory(&db));

    let failing = runtime.run(in_transaction(
        add(Todo::new(1, 1, "doomed"))
            .and_then(|()| pause(100))
            .and_then(|()| Effect::<TodoAppEnv, ()>::fail(DataError::validation("boom"))),
    ));
    let implicit = runtime.run(add(Todo::new(9, 1, "saved")).and_then(|()| pause(200)).and_then(|()| save_changes()));
    let overlapping = runtime.run(pause(50).and_then(|()| in_transaction(add(Todo::new(10, 1, "committed")))));

    let (failed, saved, committed) = tokio::join!(failing, implicit, overlapping);

    assert_eq!(failed, Err(DataError::validation("boom")));
    assert_eq!(saved, Ok(1));
    assert_eq!(committed, Ok(()));
    let ids: Vec<i64> = db.snapshot::<Todo>().unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![9, 10]);
}

#[tokio::test]
async fn test_staged_changes_do_not_outlive_a_run() {
    let db = seeded(0);
    let runtime = Runtime::new(TodoAppEnv::in_memory(&db));

    runtime.run(add(Todo::new(1, 1, "abandoned"))).await.unwrap();

    assert_eq!(runtime.run(save_changes()).await, Ok(0));
    assert!(db.snapshot::<Todo>().unwrap().is_empty());
}

#[tokio::test]
async fn test_default_timeout_cancels_slow_storage() {
    let db = seeded(3);
    db.set_latency(Duration::from_secs(30));
    let runtime = Runtime::with_config(
        TodoAppEnv::in_memory(&db),
        RuntimeConfig::default().with_default_timeout(Duration::from_millis(20)),
    );

    let result = runtime.run(find_all(Specification::<Todo>::all())).await;
    assert_eq!(result, Err(DataError::Cancelled));
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_transient_query_failures_are_retried() {
    let db = seeded(5);
    db.fail_next(StorageOp::Query, DataError::TransientStorage("connection reset".into()));
    db.fail_next(StorageOp::Query, DataError::TransientStorage("connection reset".into()));
    let runtime = Runtime::with_config(TodoAppEnv::in_memory(&db), fast_retries(3));

    let total = runtime
        .run_with_retry(|| count(Specification::<Todo>::all()))
        .await;
    assert_eq!(total, Ok(5));
}

#[tokio::test]
async fn test_retried_transaction_commits_once() {
    let db = seeded(0);
    db.fail_next(StorageOp::Commit, DataError::TransientStorage("failover".into()));
    let runtime = Runtime::with_config(TodoAppEnv::in_memory(&db), fast_retries(2));

    runtime
        .run_with_retry(|| in_transaction(add(Todo::new(1, 1, "persist me"))))
        .await
        .unwrap();

    assert_eq!(db.snapshot::<Todo>().unwrap(), vec![Todo::new(1, 1, "persist me")]);
}

#[tokio::test]
async fn test_retry_attempts_do_not_inherit_staged_changes() {
    let db = seeded(0);
    db.fail_next(StorageOp::Query, DataError::TransientStorage("blip".into()));
    let runtime = Runtime::with_config(TodoAppEnv::in_memory(&db), fast_retries(2));

    let saved = runtime
        .run_with_retry(|| {
            add(Todo::new(1, 1, "once"))
                .and_then(|()| count(Specification::<Todo>::all()))
                .and_then(|_| save_changes())
        })
        .await;

    assert_eq!(saved, Ok(1));
    assert_eq!(db.snapshot::<Todo>().unwrap(), vec![Todo::new(1, 1, "once")]);
}

#[tokio::test]
async fn test_permanent_failures_are_not_retried() {
    let db = seeded(0);
    db.fail_next(StorageOp::Query, DataError::validation("bad filter"));
    db.fail_next(StorageOp::Query, DataError::TransientStorage("unused".into()));
    let runtime = Runtime::with_config(TodoAppEnv::in_memory(&db), fast_retries(3));

    let result = runtime
        .run_with_retry(|| find_all(Specification::<Todo>::all()))
        .await;
    assert_eq!(result, Err(DataError::validation("bad filter")));
}

#[tokio::test]
async fn test_exhausted_retries_return_last_failure() {
    let db = seeded(0);
    for _ in 0..3 {
        db.fail_next(StorageOp::Query, DataError::TransientStorage("down".into()));
    }
    let runtime = Runtime::with_config(TodoAppEnv::in_memory(&db), fast_retries(1));

    let result = runtime
        .run_with_retry(|| count(Specification::<Todo>::all()))
        .await;
    assert_eq!(result, Err(DataError::TransientStorage("down".into())));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_abandons_in_flight_transaction() {
    let db = seeded(0);
    db.set_latency(Duration::from_millis(200));
    let runtime = Runtime::new(TodoAppEnv::in_memory(&db));

    let background = runtime.clone();
    let handle = tokio::spawn(async move {
        background
            .run(in_transaction(
                add(Todo::new(1, 1, "first")).and_then(|()| add(Todo::new(2, 1, "second"))),
            ))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(result, Err(DataError::Cancelled));
    assert!(db.snapshot::<Todo>().unwrap().is_empty());
    assert!(runtime.is_shut_down());
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn test_metrics_exporter_reports_effect_counters() {
    let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
    server.start().unwrap();

    let db = seeded(2);
    let runtime = Runtime::new(TodoAppEnv::in_memory(&db));
    runtime.run(count(Specification::<Todo>::all())).await.unwrap();

    let scrape = server.render().unwrap();
    assert!(scrape.contains("data_effects_executed_total"));
}
