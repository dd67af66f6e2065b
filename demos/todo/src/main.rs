//! To-do demo binary
//!
//! Runs the to-do use cases against `PostgreSQL` when `DATABASE_URL` is set,
//! and against the in-memory engine otherwise.

use composable_data_core::environment::{ClockRef, SystemClock};
use composable_data_core::error::{DataError, Result};
use composable_data_postgres::{PostgresConfig, PostgresDatabase};
use composable_data_runtime::metrics::MetricsServer;
use composable_data_runtime::retry::RetryPolicy;
use composable_data_runtime::{Runtime, RuntimeConfig};
use composable_data_testing::fixtures::{create_project_with_task, sample_todos, Project, Task, Todo, TodoAppEnv};
use composable_data_testing::mocks::FixedClock;
use composable_data_testing::InMemoryDatabase;
use std::sync::Arc;
use std::time::Duration;
use todo_demo::{clear_completed, complete_todo, create_todo, list_todos, postgres_env, ListTodos, TodoFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "todo_demo=info,composable_data_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "Demo failed");
        std::process::exit(1);
    }
}

async fn environment() -> Result<TodoAppEnv> {
    match PostgresConfig::from_env() {
        Ok(config) => {
            println!("Using PostgreSQL");
            let database = PostgresDatabase::connect(&config).await?;
            database.ensure_table::<Todo>().await?;
            database.ensure_table::<Project>().await?;
            database.ensure_table::<Task>().await?;
            let clock: ClockRef = Arc::new(SystemClock);
            Ok(postgres_env(&database, clock))
        },
        Err(reason) => {
            println!("Using the in-memory engine ({reason})");
            let db = InMemoryDatabase::new();
            db.seed(sample_todos(25))?;
            Ok(TodoAppEnv::in_memory_with_clock(&db, FixedClock::new(chrono::Utc::now())))
        },
    }
}

async fn run() -> Result<()> {
    let mut metrics = MetricsServer::new(([127, 0, 0, 1], 9090).into());
    if let Err(error) = metrics.start() {
        tracing::warn!(error = %error, "Metrics disabled");
    }

    let config = RuntimeConfig::default()
        .with_default_timeout(Duration::from_secs(5))
        .with_retry_policy(RetryPolicy::builder().max_retries(3).build());
    let runtime = Runtime::with_config(environment().await?, config);

    println!("=== To-do Demo ===\n");

    let created = runtime
        .run(create_todo(100, 1, "  water the plants  ".to_string()))
        .await?;
    println!("Created: {} ({})", created.title, created.created_at);

    let completed = runtime.run_with_retry(|| complete_todo(100)).await?;
    println!("Completed: #{} done={}", completed.id, completed.is_completed);

    match runtime.run(complete_todo(999)).await {
        Err(DataError::NotFound { entity, id }) => println!("Not found: {entity} #{id}"),
        other => println!("Unexpected: {other:?}"),
    }

    let mut request = ListTodos::first_page(TodoFilter {
        user_id: Some(1),
        completed: Some(false),
        ..TodoFilter::default()
    });
    request.page_size = 3;
    request.sort_by = "priority".to_string();
    request.direction = "desc".to_string();
    let page = runtime.run(list_todos(request)).await?;
    println!(
        "\nOpen to-dos of user 1, page {}/{} ({} total):",
        page.page_number(),
        page.total_pages(),
        page.total_count()
    );
    println!("{}", serde_json::to_string_pretty(&page).unwrap_or_default());

    let rejected = runtime
        .run(create_project_with_task(Project::new(1, "garden"), Task::new(1, 42, "orphan")))
        .await;
    println!("\nProject with orphan task: {rejected:?}");

    let removed = runtime.run(clear_completed(1)).await?;
    println!("Cleared {removed} completed to-dos of user 1");

    if let Some(scrape) = metrics.render() {
        println!("\n{} metric lines recorded", scrape.lines().count());
    }
    println!("\n=== Demo Complete ===");
    Ok(())
}
