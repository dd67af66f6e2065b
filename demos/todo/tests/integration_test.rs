//! Integration tests for the to-do use cases on the in-memory engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_data_core::error::DataError;
use composable_data_runtime::Runtime;
use composable_data_testing::fixtures::{base_time, Todo, TodoAppEnv};
use composable_data_testing::InMemoryDatabase;
use todo_demo::{clear_completed, complete_todo, create_todo, list_todos, ListTodos, TodoFilter};

fn runtime(db: &InMemoryDatabase) -> Runtime<TodoAppEnv> {
    Runtime::new(TodoAppEnv::in_memory(db))
}

#[tokio::test]
async fn test_create_uses_environment_clock() {
    let db = InMemoryDatabase::new();

    let todo = runtime(&db).run(create_todo(1, 1, " buy milk ".to_string())).await.unwrap();

    assert_eq!(todo.title, "buy milk");
    assert_eq!(todo.created_at, base_time());
    assert_eq!(db.snapshot::<Todo>().unwrap(), vec![todo]);
}

#[tokio::test]
async fn test_blank_title_is_rejected_without_writing() {
    let db = InMemoryDatabase::new();

    let result = runtime(&db).run(create_todo(1, 1, "   ".to_string())).await;

    assert!(matches!(result, Err(DataError::Validation(_))));
    assert!(db.snapshot::<Todo>().unwrap().is_empty());
}

#[tokio::test]
async fn test_complete_missing_todo_is_not_found() {
    let db = InMemoryDatabase::new();
    db.seed([Todo::new(1, 1, "a")]).unwrap();
    let runtime = runtime(&db);

    let done = runtime.run(complete_todo(1)).await.unwrap();
    assert!(done.is_completed);

    let missing = runtime.run(complete_todo(2)).await;
    assert_eq!(missing, Err(DataError::not_found("todos", 2)));
}

#[tokio::test]
async fn test_listing_filters_sorts_and_pages() {
    let db = InMemoryDatabase::new();
    db.seed([
        Todo::new(1, 1, "water plants").with_priority(Some(1)),
        Todo::new(2, 1, "water lawn").with_priority(Some(3)),
        Todo::new(3, 1, "water bill").completed(),
        Todo::new(4, 2, "water cooler"),
        Todo::new(5, 1, "walk dog").with_priority(Some(2)),
    ])
    .unwrap();

    let request = ListTodos {
        filter: TodoFilter {
            user_id: Some(1),
            completed: Some(false),
            search: Some("water".to_string()),
            min_priority: None,
        },
        page: 1,
        page_size: 1,
        sort_by: "priority".to_string(),
        direction: "desc".to_string(),
    };
    let page = runtime(&db).run(list_todos(request)).await.unwrap();

    assert_eq!(page.total_count(), 2);
    assert_eq!(page.total_pages(), 2);
    assert_eq!(page.items()[0].id, 2);
    assert!(page.has_next_page());
}

#[tokio::test]
async fn test_unknown_sort_field_is_a_validation_error() {
    let db = InMemoryDatabase::new();
    let mut request = ListTodos::first_page(TodoFilter::default());
    request.sort_by = "color".to_string();

    let result = runtime(&db).run(list_todos(request)).await;
    assert!(matches!(result, Err(DataError::Validation(_))));
}

#[tokio::test]
async fn test_clear_completed_removes_only_that_users_done_items() {
    let db = InMemoryDatabase::new();
    db.seed([
        Todo::new(1, 1, "a").completed(),
        Todo::new(2, 1, "b"),
        Todo::new(3, 1, "c").completed(),
        Todo::new(4, 2, "d").completed(),
    ])
    .unwrap();

    let removed = runtime(&db).run(clear_completed(1)).await.unwrap();

    assert_eq!(removed, 2);
    let ids: Vec<i64> = db.snapshot::<Todo>().unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![2, 4]);
}
