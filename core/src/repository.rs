//! Repository capability and the effects built on it.
//!
//! A [`Repository<E>`] is the storage-facing port for one entity type. Two
//! kinds of implementation exist side by side: an in-memory one that
//! evaluates specifications directly (`composable-data-testing`) and a
//! PostgreSQL one that translates them into SQL (`composable-data-postgres`).
//! Both select, order and count exactly the same entities.
//!
//! Mutations are *staged*: `add`, `update` and `remove` record a change in
//! the current unit of work and become durable on commit or
//! [`save_changes`](crate::unit_of_work::save_changes). Reads see the staged
//! changes of their own unit of work.

use crate::capability::Has;
use crate::effect::{access, Effect};
use crate::entity::Entity;
use crate::error::Result;
use crate::paging::SortKey;
use crate::specification::Specification;
use futures::stream::{BoxStream, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Lazily produced query results.
pub type EntityStream<E> = BoxStream<'static, Result<E>>;

/// Boxed future returned by repository operations.
pub type RepositoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage port for entities of type `E`.
///
/// # Errors
///
/// - Staging an `add` for an identifier that already exists fails with
///   [`DataError::Conflict`](crate::error::DataError::Conflict).
/// - Staging an `update` or `remove` for a missing identifier fails with
///   [`DataError::NotFound`](crate::error::DataError::NotFound).
/// - Connectivity problems surface as
///   [`DataError::TransientStorage`](crate::error::DataError::TransientStorage).
pub trait Repository<E: Entity>: Send + Sync {
    /// Stream every entity satisfying `spec`, in identifier order.
    ///
    /// No I/O happens until the stream is polled.
    fn find(&self, spec: &Specification<E>) -> EntityStream<E>;

    /// Entities satisfying `spec`, ordered by `sort` then identifier,
    /// skipping `offset` and returning at most `limit`.
    fn find_slice(
        &self,
        spec: &Specification<E>,
        sort: &SortKey<E>,
        offset: u64,
        limit: u64,
    ) -> RepositoryFuture<'_, Vec<E>>;

    /// Number of entities satisfying `spec`.
    fn count(&self, spec: &Specification<E>) -> RepositoryFuture<'_, u64>;

    /// Stage insertion of a new entity.
    fn add(&self, entity: E) -> RepositoryFuture<'_, ()>;

    /// Stage replacement of an existing entity, matched by identifier.
    fn update(&self, entity: E) -> RepositoryFuture<'_, ()>;

    /// Stage removal of an existing entity, matched by identifier.
    fn remove(&self, entity: &E) -> RepositoryFuture<'_, ()>;
}

/// Shared handle to a [`Repository`] capability.
pub type RepositoryRef<E> = Arc<dyn Repository<E>>;

/// Every entity satisfying `spec`, in identifier order.
pub fn find_all<Env, E>(spec: Specification<E>) -> Effect<Env, Vec<E>>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move {
        let items: Vec<E> = repository.find(&spec).try_collect().await?;
        tracing::trace!(entity = E::NAME, count = items.len(), "Query returned");
        Ok(items)
    })
}

/// The first entity (by identifier) satisfying `spec`, if any.
pub fn find_one<Env, E>(spec: Specification<E>) -> Effect<Env, Option<E>>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move {
        let mut stream = repository.find(&spec);
        stream.try_next().await
    })
}

/// A lazy stream over the entities satisfying `spec`.
///
/// The stream outlives the effect; cancellation is observed only while the
/// effect itself runs, so long-running consumers should check their token.
pub fn find_stream<Env, E>(spec: Specification<E>) -> Effect<Env, EntityStream<E>>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move { Ok(repository.find(&spec)) })
}

/// Number of entities satisfying `spec`.
pub fn count<Env, E>(spec: Specification<E>) -> Effect<Env, u64>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move { repository.count(&spec).await })
}

/// Stage insertion of `entity`.
pub fn add<Env, E>(entity: E) -> Effect<Env, ()>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move {
        tracing::debug!(entity = E::NAME, id = %entity.id(), "Staging insert");
        repository.add(entity).await
    })
}

/// Stage replacement of `entity`.
pub fn update<Env, E>(entity: E) -> Effect<Env, ()>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move {
        tracing::debug!(entity = E::NAME, id = %entity.id(), "Staging update");
        repository.update(entity).await
    })
}

/// Stage removal of `entity`.
pub fn remove<Env, E>(entity: E) -> Effect<Env, ()>
where
    Env: Has<RepositoryRef<E>> + Send + Sync + 'static,
    E: Entity,
{
    access(move |repository: RepositoryRef<E>| async move {
        tracing::debug!(entity = E::NAME, id = %entity.id(), "Staging removal");
        repository.remove(&entity).await
    })
}
