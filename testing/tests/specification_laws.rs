//! Property tests for the specification algebra.
//!
//! Every law is checked against direct evaluation, against predicate
//! evaluation over stored records, and against the in-memory repository.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_data_core::repository::Repository;
use composable_data_core::specification::Specification;
use composable_data_testing::fixtures::Todo;
use composable_data_testing::properties::{arb_todo, arb_todo_spec, arb_todos, select_by_predicate};
use composable_data_testing::InMemoryDatabase;
use futures::TryStreamExt;
use proptest::prelude::*;

fn selected(spec: &Specification<Todo>, todos: &[Todo]) -> Vec<i64> {
    todos.iter().filter(|t| spec.is_satisfied_by(t)).map(|t| t.id).collect()
}

fn stored_selection(spec: &Specification<Todo>, todos: &[Todo]) -> Vec<i64> {
    let db = InMemoryDatabase::new();
    db.seed(todos.to_vec()).unwrap();
    let repository = db.session().repository::<Todo>();
    let found: Vec<Todo> = tokio_test::block_on(repository.find(spec).try_collect()).unwrap();
    found.into_iter().map(|t| t.id).collect()
}

proptest! {
    /// Property: `and` is conjunction
    #[test]
    fn and_is_conjunction(a in arb_todo_spec(), b in arb_todo_spec(), todo in arb_todo(1)) {
        let combined = a.clone().and(b.clone());
        prop_assert_eq!(
            combined.is_satisfied_by(&todo),
            a.is_satisfied_by(&todo) && b.is_satisfied_by(&todo)
        );
    }

    /// Property: `or` is disjunction
    #[test]
    fn or_is_disjunction(a in arb_todo_spec(), b in arb_todo_spec(), todo in arb_todo(1)) {
        let combined = a.clone().or(b.clone());
        prop_assert_eq!(
            combined.is_satisfied_by(&todo),
            a.is_satisfied_by(&todo) || b.is_satisfied_by(&todo)
        );
    }

    /// Property: `all` is the identity of `and`, `none` the identity of `or`
    #[test]
    fn identities_hold(spec in arb_todo_spec(), todos in arb_todos(12)) {
        let expected = selected(&spec, &todos);
        prop_assert_eq!(selected(&spec.clone().and(Specification::all()), &todos), expected.clone());
        prop_assert_eq!(selected(&Specification::all().and(spec.clone()), &todos), expected.clone());
        prop_assert_eq!(selected(&spec.clone().or(Specification::none()), &todos), expected.clone());
        prop_assert_eq!(selected(&Specification::none().or(spec), &todos), expected);
    }

    /// Property: composition is associative
    #[test]
    fn composition_is_associative(
        a in arb_todo_spec(),
        b in arb_todo_spec(),
        c in arb_todo_spec(),
        todos in arb_todos(12),
    ) {
        let left = a.clone().and(b.clone()).and(c.clone());
        let right = a.clone().and(b.clone().and(c.clone()));
        prop_assert_eq!(selected(&left, &todos), selected(&right, &todos));

        let left = a.clone().or(b.clone()).or(c.clone());
        let right = a.or(b.or(c));
        prop_assert_eq!(selected(&left, &todos), selected(&right, &todos));
    }

    /// Property: De Morgan's laws hold under three-valued logic
    #[test]
    fn de_morgan(a in arb_todo_spec(), b in arb_todo_spec(), todos in arb_todos(12)) {
        let not_and = !(a.clone() & b.clone());
        let or_not = !a.clone() | !b.clone();
        prop_assert_eq!(selected(&not_and, &todos), selected(&or_not, &todos));

        let not_or = !(a.clone() | b.clone());
        let and_not = !a & !b;
        prop_assert_eq!(selected(&not_or, &todos), selected(&and_not, &todos));
    }

    /// Property: double negation is the identity
    #[test]
    fn double_negation(spec in arb_todo_spec(), todos in arb_todos(12)) {
        prop_assert_eq!(selected(&!!spec.clone(), &todos), selected(&spec, &todos));
    }

    /// Property: a row never satisfies both a specification and its negation
    #[test]
    fn negation_is_exclusive(spec in arb_todo_spec(), todo in arb_todo(1)) {
        let negated = !spec.clone();
        prop_assert!(!(spec.is_satisfied_by(&todo) && negated.is_satisfied_by(&todo)));
    }

    /// Property: a typed comparison or its negation holds for every row
    /// with a priority; the remaining rows are exactly the unprioritised ones
    #[test]
    fn comparison_or_negation_covers_every_row(literal in 0i64..5, todos in arb_todos(12)) {
        let comparisons = [
            Specification::eq(Todo::PRIORITY, literal),
            Specification::ne(Todo::PRIORITY, literal),
            Specification::lt(Todo::PRIORITY, literal),
            Specification::le(Todo::PRIORITY, literal),
            Specification::gt(Todo::PRIORITY, literal),
            Specification::ge(Todo::PRIORITY, literal),
        ];
        for spec in comparisons {
            let either = spec.clone() | !spec.clone();
            let unset = Specification::is_null(Todo::PRIORITY);
            prop_assert_eq!(selected(&(either.clone() | unset.clone()), &todos), selected(&Specification::all(), &todos));
            prop_assert_eq!(selected(&!either, &todos), Vec::<i64>::new());
            prop_assert_eq!(
                selected(&(spec.clone() | !spec), &todos),
                selected(&!unset, &todos)
            );
        }
    }

    /// Property: direct evaluation, stored-record evaluation and the
    /// repository select the same rows
    #[test]
    fn evaluation_paths_agree(spec in arb_todo_spec(), todos in arb_todos(15)) {
        let direct = selected(&spec, &todos);
        let by_predicate: Vec<i64> = select_by_predicate(&spec, &todos).iter().map(|t| t.id).collect();
        prop_assert_eq!(&by_predicate, &direct);
        prop_assert_eq!(stored_selection(&spec, &todos), direct);
    }
}

#[test]
fn contains_is_case_sensitive_substring() {
    let todo = Todo::new(1, 1, "Write Tests");
    assert!(Todo::title_contains("Tests").is_satisfied_by(&todo));
    assert!(!Todo::title_contains("tests").is_satisfied_by(&todo));
    assert!(Todo::title_contains("").is_satisfied_by(&todo));
}

#[test]
fn empty_in_list_matches_nothing() {
    let todo = Todo::new(1, 1, "x");
    let in_none = Specification::is_in(Todo::USER_ID, Vec::<i64>::new());
    assert!(!in_none.is_satisfied_by(&todo));
    assert!((!in_none).is_satisfied_by(&todo));
}
