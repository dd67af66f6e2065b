//! Proptest strategies for the fixture domain.
//!
//! Values are drawn from small domains (three users, two-letter titles,
//! five priorities) so that generated specifications select a meaningful
//! mix of rows.

use crate::fixtures::{base_time, Todo};
use chrono::Duration;
use composable_data_core::entity::Entity;
use composable_data_core::specification::Specification;
use proptest::collection::vec;
use proptest::prelude::*;

/// A to-do with the given id.
pub fn arb_todo(id: i64) -> impl Strategy<Value = Todo> {
    (1i64..=3, "[ab]{0,3}", any::<bool>(), proptest::option::of(0i64..5), 0i64..60).prop_map(
        move |(user_id, title, is_completed, priority, minutes)| {
            Todo::new(id, user_id, &title)
                .with_completed(is_completed)
                .with_priority(priority)
                .created(base_time() + Duration::minutes(minutes))
        },
    )
}

/// Up to `max` to-dos with distinct ids `1..=len`.
pub fn arb_todos(max: usize) -> impl Strategy<Value = Vec<Todo>> {
    (0..=max).prop_flat_map(|len| {
        (1..=len)
            .map(|id| arb_todo(i64::try_from(id).unwrap_or(i64::MAX)))
            .collect::<Vec<_>>()
    })
}

fn arb_leaf() -> impl Strategy<Value = Specification<Todo>> {
    prop_oneof![
        Just(Specification::all()),
        Just(Specification::none()),
        Just(Todo::is_completed()),
        (1i64..=3).prop_map(Todo::by_user),
        vec(1i64..=4, 0..3).prop_map(|users| Specification::is_in(Todo::USER_ID, users)),
        "[ab]{1,2}".prop_map(|needle| Todo::title_contains(&needle)),
        (0i64..5).prop_map(|min| Specification::ge(Todo::PRIORITY, min)),
        (0i64..5).prop_map(|max| Specification::lt(Todo::PRIORITY, max)),
        Just(Specification::is_null(Todo::PRIORITY)),
        (0i64..60).prop_map(|minutes| Todo::created_since(base_time() + Duration::minutes(minutes))),
    ]
}

/// Specifications over [`Todo`], nested up to four levels deep.
pub fn arb_todo_spec() -> impl Strategy<Value = Specification<Todo>> {
    arb_leaf().prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a & b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a | b),
            inner.prop_map(|spec| !spec),
        ]
    })
}

/// Rows selected by evaluating the predicate tree over stored records,
/// the way a query engine sees them.
#[must_use]
pub fn select_by_predicate<E: Entity>(spec: &Specification<E>, rows: &[E]) -> Vec<E> {
    let predicate = spec.as_predicate();
    rows.iter()
        .filter(|row| {
            let record = row.to_record();
            predicate.evaluate(&|field: &str| record.get(field).cloned()) == Some(true)
        })
        .cloned()
        .collect()
}
