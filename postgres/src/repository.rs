//! [`Repository`] implementation over a [`PostgresSession`].

use crate::session::PostgresSession;
use crate::sql;
use composable_data_core::entity::Entity;
use composable_data_core::error::{DataError, Result};
use composable_data_core::paging::SortKey;
use composable_data_core::repository::{EntityStream, Repository, RepositoryFuture};
use composable_data_core::specification::Specification;
use futures::{future, stream, TryStreamExt};
use sqlx::Row;
use std::marker::PhantomData;
use std::sync::Arc;

/// `PostgreSQL`-backed repository for entities of type `E`.
///
/// The table is named after [`Entity::NAME`] with one column per field; see
/// [`PostgresDatabase::ensure_table`](crate::PostgresDatabase::ensure_table).
pub struct PostgresRepository<E> {
    session: Arc<PostgresSession>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> PostgresRepository<E> {
    pub(crate) const fn new(session: Arc<PostgresSession>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> for PostgresRepository<E> {
    fn find(&self, spec: &Specification<E>) -> EntityStream<E> {
        let session = Arc::clone(&self.session);
        let query = sql::select(spec);
        match query {
            Ok(query) => Box::pin(
                session
                    .fetch(query, "find")
                    .and_then(|row| future::ready(sql::decode::<E>(&row))),
            ),
            Err(error) => Box::pin(stream::once(future::ready(Err(error)))),
        }
    }

    fn find_slice(
        &self,
        spec: &Specification<E>,
        sort: &SortKey<E>,
        offset: u64,
        limit: u64,
    ) -> RepositoryFuture<'_, Vec<E>> {
        let query = sql::select_slice(spec, sort, offset, limit);
        Box::pin(async move {
            let rows = self.session.fetch_all(query?, "find_slice").await?;
            rows.iter().map(sql::decode::<E>).collect()
        })
    }

    fn count(&self, spec: &Specification<E>) -> RepositoryFuture<'_, u64> {
        let query = sql::count(spec);
        Box::pin(async move {
            let rows = self.session.fetch_all(query?, "count").await?;
            let total: i64 = rows
                .first()
                .ok_or_else(|| DataError::Unknown("COUNT returned no row".to_string()))?
                .try_get(0)
                .map_err(|e| DataError::Unknown(e.to_string()))?;
            Ok(u64::try_from(total).unwrap_or_default())
        })
    }

    fn add(&self, entity: E) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let statement = sql::insert(&entity)?;
            self.session
                .execute(statement, "add", None)
                .await
                .map_err(|error| match error {
                    DataError::Conflict(message) => {
                        DataError::conflict(format!("{} {}: {message}", E::NAME, entity.id()))
                    },
                    other => other,
                })
        })
    }

    fn update(&self, entity: E) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let statement = sql::update(&entity)?;
            let missing = DataError::not_found(E::NAME, entity.id());
            self.session.execute(statement, "update", Some(missing)).await
        })
    }

    fn remove(&self, entity: &E) -> RepositoryFuture<'_, ()> {
        let statement = sql::delete(entity);
        let missing = DataError::not_found(E::NAME, entity.id());
        Box::pin(async move { self.session.execute(statement?, "remove", Some(missing)).await })
    }
}
