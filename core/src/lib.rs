//! # Composable Data Core
//!
//! Core traits and types for effect-based data access.
//!
//! This crate provides the abstractions application code is written against.
//! It performs no I/O itself: storage lives behind capabilities that a
//! runtime environment binds.
//!
//! ## Core Concepts
//!
//! - **Effect**: Lazy description of environment-dependent work ([`effect::Effect`])
//! - **Capability**: Dependency supplied by the environment ([`capability::Has`])
//! - **Specification**: Composable predicate, evaluated in memory or translated to a query
//! - **Repository**: Storage port per entity type
//! - **Pager**: Count plus bounded slice, wrapped in a [`paging::PagedResult`]
//! - **Unit of Work**: Atomic commit of staged changes
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//! - Errors as values
//!
//! ## Example
//!
//! ```ignore
//! use composable_data_core::prelude::*;
//!
//! fn open_todos<Env>(user_id: i64, page: i64) -> Effect<Env, PagedResult<Todo>>
//! where
//!     Env: Has<RepositoryRef<Todo>> + Send + Sync + 'static,
//! {
//!     let spec = Specification::eq(Todo::USER_ID, user_id)
//!         .and(!Specification::eq(Todo::IS_COMPLETED, true));
//!     let request = PageRequest::new(page, 20, SortKey::desc(Todo::CREATED_AT));
//!     Effect::from_result(request).and_then(move |request| paginate(spec, request))
//! }
//! ```

pub mod cancel;
pub mod capability;
pub mod effect;
pub mod entity;
pub mod environment;
pub mod error;
pub mod paging;
pub mod repository;
pub mod specification;
pub mod unit_of_work;
pub mod value;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

/// Everything application code usually needs.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::capability::Has;
    pub use crate::effect::{access, ask, par_all, par_all_settled, sequence, Context, Effect, Scope};
    pub use crate::entity::{Entity, Field, FieldDef};
    pub use crate::environment::{Clock, ClockRef, SystemClock};
    pub use crate::error::{DataError, ErrorKind, Result};
    pub use crate::paging::{paginate, PageRequest, PagedResult, PagingLimits, SortDirection, SortKey};
    pub use crate::repository::{EntityStream, Repository, RepositoryRef};
    pub use crate::specification::{CompareOp, Predicate, Specification};
    pub use crate::unit_of_work::{
        in_session, in_transaction, save_changes, OpenSession, Session, TransactionState, UnitOfWork,
        UnitOfWorkRef,
    };
    pub use crate::value::{FieldType, FromValue, IntoValue, Record, Value, ValueKind};
}
