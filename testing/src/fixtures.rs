//! Fixture entities, their named specifications, and a ready-made environment.
//!
//! The to-do domain used throughout the test suites and the demo:
//! [`Todo`] for filtering and paging, [`Project`] and [`Task`] for
//! multi-entity transactions.

use crate::mocks::{test_clock, FixedClock};
use crate::memory::InMemoryDatabase;
use chrono::{DateTime, Duration, Utc};
use composable_data_core::capability::Has;
use composable_data_core::effect::Effect;
use composable_data_core::environment::ClockRef;
use composable_data_core::error::DataError;
use composable_data_core::repository::{self, RepositoryRef};
use composable_data_core::specification::Specification;
use composable_data_core::unit_of_work::{in_transaction, OpenSession, Session, UnitOfWorkRef};
use composable_data_macros::Entity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Creation time of the first fixture row (2025-01-01 00:00:00 UTC).
#[must_use]
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// A to-do item.
#[derive(Entity, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[entity(table = "todos")]
pub struct Todo {
    /// Identifier
    pub id: i64,
    /// Owner
    pub user_id: i64,
    /// Short description
    pub title: String,
    /// Completion flag
    pub is_completed: bool,
    /// Optional priority; `None` is stored as NULL
    pub priority: Option<i64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Todo {
    /// An open, unprioritised to-do created `id` minutes after [`base_time`].
    #[must_use]
    pub fn new(id: i64, user_id: i64, title: &str) -> Self {
        Self {
            id,
            user_id,
            title: title.to_string(),
            is_completed: false,
            priority: None,
            created_at: base_time() + Duration::minutes(id),
        }
    }

    /// Mark as completed
    #[must_use]
    pub const fn completed(mut self) -> Self {
        self.is_completed = true;
        self
    }

    /// Set the completion flag
    #[must_use]
    pub const fn with_completed(mut self, is_completed: bool) -> Self {
        self.is_completed = is_completed;
        self
    }

    /// Set the priority
    #[must_use]
    pub const fn with_priority(mut self, priority: Option<i64>) -> Self {
        self.priority = priority;
        self
    }

    /// Set the creation time
    #[must_use]
    pub const fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Completed to-dos.
    #[must_use]
    pub fn is_completed() -> Specification<Self> {
        Specification::eq(Self::IS_COMPLETED, true)
    }

    /// To-dos owned by `user_id`.
    #[must_use]
    pub fn by_user(user_id: i64) -> Specification<Self> {
        Specification::eq(Self::USER_ID, user_id)
    }

    /// To-dos whose title contains `needle` (case-sensitive).
    #[must_use]
    pub fn title_contains(needle: &str) -> Specification<Self> {
        Specification::contains(Self::TITLE, needle)
    }

    /// To-dos created at or after `at`.
    #[must_use]
    pub fn created_since(at: DateTime<Utc>) -> Specification<Self> {
        Specification::ge(Self::CREATED_AT, at)
    }

    /// To-dos with a priority of at least `min`. Unprioritised rows never match.
    #[must_use]
    pub fn urgent(min: i64) -> Specification<Self> {
        Specification::ge(Self::PRIORITY, min)
    }
}

/// A label keyed by a text code, for checking identifier ordering.
#[derive(Entity, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Identifier
    #[entity(id)]
    pub code: String,
    /// Display color
    pub color: String,
}

impl Label {
    /// A label of `color`.
    #[must_use]
    pub fn new(code: &str, color: &str) -> Self {
        Self {
            code: code.to_string(),
            color: color.to_string(),
        }
    }
}

/// Codes whose bytewise order differs from case-insensitive and
/// locale-aware orderings.
#[must_use]
pub fn mixed_case_labels() -> Vec<Label> {
    ["b", "a-b", "B", "A_b", "a", "Ab", "_a"]
        .iter()
        .enumerate()
        .map(|(i, code)| Label::new(code, if i % 2 == 0 { "red" } else { "blue" }))
        .collect()
}

/// A project owning tasks.
#[derive(Entity, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Identifier
    pub id: i64,
    /// Display title
    pub title: String,
    /// Set once the project is archived
    pub archived_at: Option<DateTime<Utc>>,
}

impl Project {
    /// An active project
    #[must_use]
    pub fn new(id: i64, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            archived_at: None,
        }
    }

    /// Projects that are not archived.
    #[must_use]
    pub fn active() -> Specification<Self> {
        Specification::is_null(Self::ARCHIVED_AT)
    }
}

/// A task belonging to a [`Project`].
#[derive(Entity, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier
    pub id: i64,
    /// Owning project
    pub project_id: i64,
    /// Short description
    pub title: String,
    /// Assigned user, if any
    pub assignee: Option<String>,
}

impl Task {
    /// An unassigned task
    #[must_use]
    pub fn new(id: i64, project_id: i64, title: &str) -> Self {
        Self {
            id,
            project_id,
            title: title.to_string(),
            assignee: None,
        }
    }

    /// Tasks of `project_id`.
    #[must_use]
    pub fn in_project(project_id: i64) -> Specification<Self> {
        Specification::eq(Self::PROJECT_ID, project_id)
    }
}

/// Repositories and unit of work of one storage session.
#[derive(Clone)]
pub struct TodoSession {
    /// To-do repository
    pub todos: RepositoryRef<Todo>,
    /// Project repository
    pub projects: RepositoryRef<Project>,
    /// Task repository
    pub tasks: RepositoryRef<Task>,
    /// Transaction boundary for the repositories above
    pub unit_of_work: UnitOfWorkRef,
}

impl TodoSession {
    /// Bind every repository to `session`.
    #[must_use]
    pub fn bind<S: Session>(session: &Arc<S>) -> Self {
        Self {
            todos: session.repository(),
            projects: session.repository(),
            tasks: session.repository(),
            unit_of_work: Arc::clone(session) as UnitOfWorkRef,
        }
    }
}

type SessionOpener = Arc<dyn Fn() -> TodoSession + Send + Sync>;

/// Runtime environment for the to-do domain.
///
/// The repositories and the unit of work belong to one storage session.
/// [`OpenSession`] rebinds them to a new session of the same backend, which
/// is how each transaction and each runtime execution gets its own.
#[derive(Clone)]
pub struct TodoAppEnv {
    /// To-do repository
    pub todos: RepositoryRef<Todo>,
    /// Project repository
    pub projects: RepositoryRef<Project>,
    /// Task repository
    pub tasks: RepositoryRef<Task>,
    /// Transaction boundary for the repositories above
    pub unit_of_work: UnitOfWorkRef,
    /// Time source
    pub clock: ClockRef,
    open: SessionOpener,
}

composable_data_core::provide!(TodoAppEnv {
    todos: RepositoryRef<Todo>,
    projects: RepositoryRef<Project>,
    tasks: RepositoryRef<Task>,
    unit_of_work: UnitOfWorkRef,
    clock: ClockRef,
});

impl TodoAppEnv {
    /// Environment over sessions produced by `open`, bound to a first one.
    pub fn new<S, F>(open: F, clock: ClockRef) -> Self
    where
        S: Session,
        F: Fn() -> Arc<S> + Send + Sync + 'static,
    {
        let open: SessionOpener = Arc::new(move || TodoSession::bind(&open()));
        Self::bound(open(), clock, open)
    }

    /// Environment over sessions of `db`, with [`test_clock`].
    #[must_use]
    pub fn in_memory(db: &InMemoryDatabase) -> Self {
        Self::in_memory_with_clock(db, test_clock())
    }

    /// Environment over sessions of `db`, with a custom fixed clock.
    #[must_use]
    pub fn in_memory_with_clock(db: &InMemoryDatabase, clock: FixedClock) -> Self {
        let db = db.clone();
        Self::new(move || db.session(), Arc::new(clock))
    }

    fn bound(session: TodoSession, clock: ClockRef, open: SessionOpener) -> Self {
        Self {
            todos: session.todos,
            projects: session.projects,
            tasks: session.tasks,
            unit_of_work: session.unit_of_work,
            clock,
            open,
        }
    }
}

impl OpenSession for TodoAppEnv {
    fn open_session(&self) -> Self {
        Self::bound((self.open)(), Arc::clone(&self.clock), Arc::clone(&self.open))
    }
}

/// Stage `task` after checking that its project exists.
///
/// # Errors
///
/// Fails with [`DataError::Validation`] if the project is unknown.
pub fn create_task<Env>(task: Task) -> Effect<Env, ()>
where
    Env: Has<RepositoryRef<Project>> + Has<RepositoryRef<Task>> + Send + Sync + 'static,
{
    repository::find_one(Specification::<Project>::with_id(task.project_id)).and_then(move |project| match project {
        Some(_) => repository::add(task),
        None => Effect::fail(DataError::validation(format!(
            "task {} references unknown project {}",
            task.id, task.project_id
        ))),
    })
}

/// Create a project and its first task atomically.
pub fn create_project_with_task<Env>(project: Project, task: Task) -> Effect<Env, ()>
where
    Env: Has<RepositoryRef<Project>>
        + Has<RepositoryRef<Task>>
        + Has<UnitOfWorkRef>
        + OpenSession
        + Send
        + Sync
        + 'static,
{
    in_transaction(repository::add(project).and_then(move |()| create_task(task)))
}

/// One to-do per flag, ids starting at 1, all owned by user 1.
#[must_use]
pub fn todos_with_completion(flags: &[bool]) -> Vec<Todo> {
    (1..)
        .zip(flags)
        .map(|(id, done)| Todo::new(id, 1, &format!("todo {id}")).with_completed(*done))
        .collect()
}

/// `count` to-dos with ids `1..=count`, cycling through users 1 to 3.
///
/// Every third to-do is completed and every fourth has no priority.
#[must_use]
pub fn sample_todos(count: i64) -> Vec<Todo> {
    (1..=count)
        .map(|id| {
            Todo::new(id, id % 3 + 1, &format!("todo {id}"))
                .with_completed(id % 3 == 0)
                .with_priority((id % 4 != 0).then_some(id % 5))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_data_core::cancel::CancellationToken;
    use composable_data_core::entity::Entity;
    use composable_data_core::value::Value;

    #[test]
    fn fixtures_have_expected_schema() {
        assert_eq!(Todo::NAME, "todos");
        assert_eq!(Project::NAME, "projects");
        assert_eq!(Task::NAME, "tasks");
        assert_eq!(Todo::fields().len(), 6);
        assert_eq!(Todo::new(3, 1, "x").value_of("priority"), Some(Value::Null));
    }

    #[test]
    fn named_specifications_select_expected_rows() {
        let todo = Todo::new(1, 7, "Buy milk").completed().with_priority(Some(3));
        assert!(Todo::is_completed().is_satisfied_by(&todo));
        assert!(Todo::by_user(7).is_satisfied_by(&todo));
        assert!(!Todo::by_user(8).is_satisfied_by(&todo));
        assert!(Todo::title_contains("milk").is_satisfied_by(&todo));
        assert!(!Todo::title_contains("Milk").is_satisfied_by(&todo));
        assert!(Todo::urgent(3).is_satisfied_by(&todo));
        assert!(!Todo::urgent(3).is_satisfied_by(&Todo::new(2, 7, "x")));
    }

    #[test]
    fn sample_data_is_deterministic() {
        assert_eq!(sample_todos(12), sample_todos(12));
        let flags: Vec<bool> = todos_with_completion(&[true, false]).iter().map(|t| t.is_completed).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn task_for_unknown_project_is_rejected() {
        let db = InMemoryDatabase::new();
        let env = Arc::new(TodoAppEnv::in_memory(&db));
        let result = create_task(Task::new(1, 99, "orphan"))
            .run(env, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DataError::Validation(_))));
    }
}
