//! One unit of work over a single database transaction.
//!
//! A session is used once: after `commit` or `rollback` it rejects further
//! work, and the next operation opens a new session from the pool.
//!
//! The first mutation (or `begin`) opens a database transaction that every
//! later statement of the session runs in, so reads see the session's own
//! uncommitted writes and other sessions see nothing until commit. Each
//! mutation runs inside a savepoint: a rejected mutation is rolled back on
//! its own and leaves the rest of the session usable.

use crate::error::map_sqlx_error;
use crate::repository::PostgresRepository;
use crate::sql::Sql;
use composable_data_core::entity::Entity;
use composable_data_core::error::{DataError, Result};
use composable_data_core::repository::RepositoryRef;
use composable_data_core::unit_of_work::{Session, TransactionState, UnitOfWork, UnitOfWorkFuture};
use futures::stream::{BoxStream, TryStreamExt};
use metrics::counter;
use sqlx::postgres::{PgQueryResult, PgRow};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

#[derive(Default)]
struct SessionState {
    open: Option<Transaction<'static, Postgres>>,
    staged: usize,
}

/// A unit-of-work session against a `PostgreSQL` pool.
pub struct PostgresSession {
    pool: PgPool,
    state: Mutex<SessionState>,
    // Written only while `state` is locked.
    lifecycle: std::sync::Mutex<TransactionState>,
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession").finish_non_exhaustive()
    }
}

impl PostgresSession {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: Mutex::new(SessionState::default()),
            lifecycle: std::sync::Mutex::new(TransactionState::Idle),
        }
    }

    fn lifecycle(&self) -> TransactionState {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, next: TransactionState) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Repository for `E` bound to this session
    #[must_use]
    pub fn repository<E: Entity>(self: &Arc<Self>) -> RepositoryRef<E> {
        Arc::new(PostgresRepository::<E>::new(Arc::clone(self)))
    }

    /// Run a read on the open transaction, or on the pool if none is open.
    pub(crate) async fn fetch_all(&self, mut query: Sql, operation: &'static str) -> Result<Vec<PgRow>> {
        counter!("data_queries_total", "operation" => operation).increment(1);
        tracing::trace!(sql = query.sql(), operation, "Executing query");
        let mut state = self.state.lock().await;
        let rows = match state.open.as_mut() {
            Some(tx) => query.build().fetch_all(&mut **tx).await,
            None => query.build().fetch_all(&self.pool).await,
        };
        rows.map_err(map_sqlx_error)
    }

    /// Stream the rows of a read as the database returns them.
    ///
    /// Holds the session lock until the stream is dropped, so a session's
    /// statements never interleave on its connection.
    pub(crate) fn fetch(self: &Arc<Self>, query: Sql, operation: &'static str) -> BoxStream<'static, Result<PgRow>> {
        counter!("data_queries_total", "operation" => operation).increment(1);
        tracing::trace!(sql = query.sql(), operation, "Streaming query");
        let session = Arc::clone(self);
        Box::pin(async_stream::try_stream! {
            let mut query = query;
            let mut state = session.state.lock().await;
            if let Some(tx) = state.open.as_mut() {
                let mut rows = query.build().fetch(&mut **tx);
                while let Some(row) = rows.try_next().await.map_err(map_sqlx_error)? {
                    yield row;
                }
            } else {
                drop(state);
                let mut conn = session.pool.acquire().await.map_err(map_sqlx_error)?;
                let mut rows = query.build().fetch(&mut *conn);
                while let Some(row) = rows.try_next().await.map_err(map_sqlx_error)? {
                    yield row;
                }
            }
        })
    }

    /// Run a mutation inside a savepoint of the session transaction.
    ///
    /// When `missing` is set, a statement that affects no row fails with it.
    pub(crate) async fn execute(
        &self,
        mut statement: Sql,
        operation: &'static str,
        missing: Option<DataError>,
    ) -> Result<()> {
        counter!("data_queries_total", "operation" => operation).increment(1);
        tracing::trace!(sql = statement.sql(), operation, "Staging mutation");
        let mut state = self.state.lock().await;
        self.lifecycle().ensure_open()?;
        if state.open.is_none() {
            state.open = Some(self.pool.begin().await.map_err(map_sqlx_error)?);
        }
        let Some(tx) = state.open.as_mut() else {
            return Err(DataError::invalid_state("session transaction is not open"));
        };

        let mut savepoint = Acquire::begin(&mut **tx).await.map_err(map_sqlx_error)?;
        let outcome: std::result::Result<PgQueryResult, _> = statement.build().execute(&mut *savepoint).await;
        match (outcome, missing) {
            (Ok(result), Some(not_found)) if result.rows_affected() == 0 => {
                savepoint.rollback().await.map_err(map_sqlx_error)?;
                Err(not_found)
            },
            (Ok(_), _) => {
                savepoint.commit().await.map_err(map_sqlx_error)?;
                state.staged += 1;
                Ok(())
            },
            (Err(error), _) => {
                savepoint.rollback().await.map_err(map_sqlx_error)?;
                Err(map_sqlx_error(error))
            },
        }
    }

    async fn finish(state: &mut SessionState) -> Result<usize> {
        let staged = std::mem::take(&mut state.staged);
        match state.open.take() {
            Some(tx) => {
                tx.commit().await.map_err(map_sqlx_error)?;
                counter!("data_transactions_committed_total").increment(1);
                Ok(staged)
            },
            None => Ok(0),
        }
    }
}

impl UnitOfWork for PostgresSession {
    fn begin(&self) -> UnitOfWorkFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let next = self.lifecycle().begin()?;
            if state.open.is_none() {
                state.open = Some(self.pool.begin().await.map_err(map_sqlx_error)?);
            }
            self.set_lifecycle(next);
            tracing::debug!(staged = state.staged, "Database transaction started");
            Ok(())
        })
    }

    fn commit(&self) -> UnitOfWorkFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let committed = self.lifecycle().commit()?;
            match Self::finish(&mut state).await {
                Ok(applied) => {
                    self.set_lifecycle(committed);
                    tracing::debug!(applied, "Database transaction committed");
                    Ok(())
                },
                Err(error) => {
                    self.set_lifecycle(TransactionState::RolledBack);
                    counter!("data_transactions_rolled_back_total").increment(1);
                    tracing::warn!(error = %error, "Commit failed, transaction rolled back");
                    Err(error)
                },
            }
        })
    }

    fn rollback(&self) -> UnitOfWorkFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.set_lifecycle(self.lifecycle().rollback()?);
            let discarded = std::mem::take(&mut state.staged);
            counter!("data_transactions_rolled_back_total").increment(1);
            tracing::debug!(discarded, "Database transaction rolled back");
            match state.open.take() {
                Some(tx) => tx.rollback().await.map_err(map_sqlx_error),
                None => Ok(()),
            }
        })
    }

    fn save_changes(&self) -> UnitOfWorkFuture<'_, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.lifecycle().ensure_implicit()?;
            Self::finish(&mut state).await
        })
    }

    fn state(&self) -> TransactionState {
        self.lifecycle()
    }
}

impl Session for PostgresSession {
    fn repository<E: Entity>(self: &Arc<Self>) -> RepositoryRef<E> {
        Self::repository(self)
    }
}
