//! # To-do Demo
//!
//! Application-level use cases for a small to-do service, written once as
//! effects and run unchanged against the in-memory engine or `PostgreSQL`.
//!
//! This example showcases:
//! - Building specifications from optional request filters
//! - Paging with a sort key chosen at runtime
//! - Mapping pages of entities to serializable summaries
//! - Implicit saves and explicit transactions
//!
//! ## Example
//!
//! ```no_run
//! use composable_data_runtime::Runtime;
//! use composable_data_testing::fixtures::TodoAppEnv;
//! use composable_data_testing::InMemoryDatabase;
//! use todo_demo::{list_todos, ListTodos, TodoFilter};
//!
//! # async fn example() -> composable_data_core::error::Result<()> {
//! let db = InMemoryDatabase::new();
//! let runtime = Runtime::new(TodoAppEnv::in_memory(&db));
//!
//! let page = runtime
//!     .run(list_todos(ListTodos::first_page(TodoFilter::for_user(1))))
//!     .await?;
//! println!("{}", serde_json::to_string(&page).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use composable_data_core::capability::Has;
use composable_data_core::effect::{access, sequence, Effect};
use composable_data_core::environment::ClockRef;
use composable_data_core::error::DataError;
use composable_data_core::paging::{paginate, PageRequest, PagedResult, SortKey};
use composable_data_core::repository::{self, RepositoryRef};
use composable_data_core::specification::Specification;
use composable_data_core::unit_of_work::{in_transaction, save_changes, OpenSession, UnitOfWorkRef};
use composable_data_postgres::PostgresDatabase;
use composable_data_testing::fixtures::{Todo, TodoAppEnv};
use serde::{Deserialize, Serialize};

/// Optional filters of a to-do listing; unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoFilter {
    /// Owner
    pub user_id: Option<i64>,
    /// Completion flag
    pub completed: Option<bool>,
    /// Substring of the title
    pub search: Option<String>,
    /// Lowest priority included
    pub min_priority: Option<i64>,
}

impl TodoFilter {
    /// Every to-do of `user_id`.
    #[must_use]
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Conjunction of the filters that are set.
    #[must_use]
    pub fn to_specification(&self) -> Specification<Todo> {
        Specification::all_of([
            self.user_id.map(Todo::by_user),
            self.completed.map(|done| Specification::eq(Todo::IS_COMPLETED, done)),
            self.search.as_deref().map(Todo::title_contains),
            self.min_priority.map(Todo::urgent),
        ])
    }
}

/// A listing request as it arrives from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTodos {
    /// Filters
    pub filter: TodoFilter,
    /// 1-based page number
    pub page: i64,
    /// Items per page
    pub page_size: i64,
    /// Field to sort by
    pub sort_by: String,
    /// `asc` or `desc`
    pub direction: String,
}

impl ListTodos {
    /// First page of 20, oldest first.
    #[must_use]
    pub fn first_page(filter: TodoFilter) -> Self {
        Self {
            filter,
            page: 1,
            page_size: 20,
            sort_by: "created_at".to_string(),
            direction: "asc".to_string(),
        }
    }
}

/// What a listing returns per to-do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoSummary {
    /// Identifier
    pub id: i64,
    /// Title
    pub title: String,
    /// Completion flag
    pub done: bool,
}

impl From<Todo> for TodoSummary {
    fn from(todo: Todo) -> Self {
        Self {
            id: todo.id,
            title: todo.title,
            done: todo.is_completed,
        }
    }
}

/// One page of to-do summaries.
///
/// Fails with [`DataError::Validation`] for an unknown sort field or
/// direction, or an out-of-range page.
pub fn list_todos<Env>(request: ListTodos) -> Effect<Env, PagedResult<TodoSummary>>
where
    Env: Has<RepositoryRef<Todo>> + Send + Sync + 'static,
{
    let spec = request.filter.to_specification();
    let page = SortKey::parse(&request.sort_by, &request.direction)
        .and_then(|sort| PageRequest::new(request.page, request.page_size, sort));
    Effect::from_result(page)
        .and_then(move |page| paginate(spec, page))
        .map(|page| page.map(TodoSummary::from))
}

/// Create and save a to-do stamped with the environment's clock.
pub fn create_todo<Env>(id: i64, user_id: i64, title: String) -> Effect<Env, Todo>
where
    Env: Has<RepositoryRef<Todo>> + Has<UnitOfWorkRef> + Has<ClockRef> + Send + Sync + 'static,
{
    let title = title.trim().to_string();
    if title.is_empty() {
        return Effect::fail(DataError::validation("title must not be empty"));
    }
    access(move |clock: ClockRef| async move { Ok(Todo::new(id, user_id, &title).created(clock.now())) }).and_then(
        |todo: Todo| {
            repository::add(todo.clone())
                .and_then(|()| save_changes())
                .map(move |_| todo)
        },
    )
}

/// Mark a to-do as completed and save it.
pub fn complete_todo<Env>(id: i64) -> Effect<Env, Todo>
where
    Env: Has<RepositoryRef<Todo>> + Has<UnitOfWorkRef> + Send + Sync + 'static,
{
    repository::find_one(Specification::<Todo>::with_id(id)).and_then(move |found| match found {
        Some(todo) => {
            let done = todo.completed();
            repository::update(done.clone())
                .and_then(|()| save_changes())
                .map(move |_| done)
        },
        None => Effect::fail(DataError::not_found("todos", id)),
    })
}

/// Remove every completed to-do of `user_id` in one transaction.
///
/// Returns the number removed.
pub fn clear_completed<Env>(user_id: i64) -> Effect<Env, usize>
where
    Env: Has<RepositoryRef<Todo>> + Has<UnitOfWorkRef> + OpenSession + Send + Sync + 'static,
{
    let spec = Todo::by_user(user_id) & Todo::is_completed();
    in_transaction(repository::find_all(spec).and_then(|done| {
        let removed = done.len();
        sequence(done.into_iter().map(repository::remove).collect()).map(move |_| removed)
    }))
}

/// Environment whose sessions are opened on `database`.
#[must_use]
pub fn postgres_env(database: &PostgresDatabase, clock: ClockRef) -> TodoAppEnv {
    let database = database.clone();
    TodoAppEnv::new(move || database.session(), clock)
}
