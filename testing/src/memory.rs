//! In-memory storage engine
//!
//! Fast, deterministic stand-in for a relational database:
//! - [`InMemoryDatabase`]: committed rows, shared by every session of a test
//! - [`InMemorySession`]: one unit of work; stages changes and implements [`Session`]
//! - [`InMemoryRepository`]: evaluates specifications directly against the session's view
//!
//! Each committed row carries a version. A change staged against a version
//! that another session has since replaced fails the whole commit with
//! [`DataError::Conflict`]; nothing is applied.
//!
//! Faults and latency can be injected to exercise failure and cancellation
//! paths.
//!
//! # Example
//!
//! ```
//! use composable_data_testing::fixtures::Todo;
//! use composable_data_testing::memory::InMemoryDatabase;
//! use composable_data_core::repository::RepositoryRef;
//! use composable_data_core::specification::Specification;
//! use futures::TryStreamExt;
//!
//! # tokio_test::block_on(async {
//! let db = InMemoryDatabase::new();
//! let session = db.session();
//! let todos: RepositoryRef<Todo> = session.repository();
//!
//! todos.add(Todo::new(1, 7, "Write tests")).await?;
//! let visible: Vec<Todo> = todos.find(&Specification::all()).try_collect().await?;
//! assert_eq!(visible.len(), 1);
//! assert!(db.snapshot::<Todo>()?.is_empty()); // not committed yet
//! # Ok::<_, composable_data_core::error::DataError>(())
//! # }).unwrap();
//! ```

use composable_data_core::entity::Entity;
use composable_data_core::error::{DataError, Result};
use composable_data_core::paging::SortKey;
use composable_data_core::repository::{EntityStream, Repository, RepositoryFuture, RepositoryRef};
use composable_data_core::specification::Specification;
use composable_data_core::unit_of_work::{Session, TransactionState, UnitOfWork, UnitOfWorkFuture};
use composable_data_core::value::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Storage operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    /// `find`, `find_slice` and `count`
    Query,
    /// Staging an insert
    Add,
    /// Staging an update
    Update,
    /// Staging a removal
    Remove,
    /// `commit` and `save_changes`
    Commit,
    /// `rollback`
    Rollback,
}

/// Injected faults and latency.
#[derive(Default)]
struct Faults {
    queued: Mutex<Vec<(StorageOp, DataError)>>,
    latency: Mutex<Duration>,
}

struct Row<E> {
    entity: E,
    version: u64,
}

struct Table<E> {
    rows: BTreeMap<Value, Row<E>>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self { rows: BTreeMap::new() }
    }
}

/// Committed state: one type-erased table per entity collection.
#[derive(Default)]
struct Store {
    tables: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    version: u64,
}

fn collection_clash<E: Entity>() -> DataError {
    DataError::Unknown(format!(
        "collection '{}' is registered for a different entity type",
        E::NAME
    ))
}

impl Store {
    fn table<E: Entity>(&self) -> Result<Option<&Table<E>>> {
        self.tables.get(E::NAME).map_or(Ok(None), |table| {
            table
                .downcast_ref::<Table<E>>()
                .map(Some)
                .ok_or_else(collection_clash::<E>)
        })
    }

    fn table_mut<E: Entity>(&mut self) -> Result<&mut Table<E>> {
        self.tables
            .entry(E::NAME)
            .or_insert_with(|| Box::new(Table::<E>::default()))
            .downcast_mut::<Table<E>>()
            .ok_or_else(collection_clash::<E>)
    }

    fn version_of<E: Entity>(&self, id: &Value) -> Result<Option<u64>> {
        Ok(self
            .table::<E>()?
            .and_then(|table| table.rows.get(id))
            .map(|row| row.version))
    }
}

/// A staged change to one row.
enum Staged<E> {
    Inserted(E),
    Updated { entity: E, base_version: u64 },
    Removed { base_version: u64 },
}

/// Staged changes to one collection, keyed by identifier.
struct PendingTable<E> {
    changes: BTreeMap<Value, Staged<E>>,
}

impl<E> Default for PendingTable<E> {
    fn default() -> Self {
        Self {
            changes: BTreeMap::new(),
        }
    }
}

/// Type-erased view of a [`PendingTable`], used at commit time.
trait PendingChanges: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    /// Fail if any change is based on a row version that is no longer current.
    fn check(&self, store: &Store) -> Result<()>;
    fn apply(&self, store: &mut Store, version: u64) -> Result<()>;
}

impl<E: Entity> PendingChanges for PendingTable<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.changes.len()
    }

    fn check(&self, store: &Store) -> Result<()> {
        for (id, staged) in &self.changes {
            let current = store.version_of::<E>(id)?;
            match (staged, current) {
                (Staged::Inserted(_), None) => {},
                (Staged::Inserted(_), Some(_)) => {
                    return Err(DataError::conflict(format!(
                        "{} {id} was inserted by another session",
                        E::NAME
                    )));
                },
                (
                    Staged::Updated { base_version, .. } | Staged::Removed { base_version },
                    Some(version),
                ) if version == *base_version => {},
                (Staged::Updated { .. } | Staged::Removed { .. }, _) => {
                    return Err(DataError::conflict(format!(
                        "{} {id} was modified by another session",
                        E::NAME
                    )));
                },
            }
        }
        Ok(())
    }

    fn apply(&self, store: &mut Store, version: u64) -> Result<()> {
        let table = store.table_mut::<E>()?;
        for (id, staged) in &self.changes {
            match staged {
                Staged::Inserted(entity) | Staged::Updated { entity, .. } => {
                    table.rows.insert(
                        id.clone(),
                        Row {
                            entity: entity.clone(),
                            version,
                        },
                    );
                },
                Staged::Removed { .. } => {
                    table.rows.remove(id);
                },
            }
        }
        Ok(())
    }
}

type Pending = HashMap<&'static str, Box<dyn PendingChanges>>;

/// In-memory relational store for fast, deterministic tests.
///
/// Cloning is cheap; clones share the same data. Create a fresh database
/// per test.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    store: Arc<RwLock<Store>>,
    faults: Arc<Faults>,
}

impl std::fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.read();
        f.debug_struct("InMemoryDatabase")
            .field("collections", &store.tables.keys().collect::<Vec<_>>())
            .field("version", &store.version)
            .finish()
    }
}

impl InMemoryDatabase {
    /// Create an empty database
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new unit-of-work session
    #[must_use]
    pub fn session(&self) -> Arc<InMemorySession> {
        Arc::new(InMemorySession {
            db: self.clone(),
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Commit `entities` directly, bypassing sessions (test setup)
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] if an identifier already exists.
    pub fn seed<E: Entity>(&self, entities: impl IntoIterator<Item = E>) -> Result<()> {
        let mut pending = PendingTable::<E>::default();
        for entity in entities {
            let id = entity.id_value();
            if pending.changes.insert(id.clone(), Staged::Inserted(entity)).is_some() {
                return Err(DataError::conflict(format!("duplicate {} {id} in seed data", E::NAME)));
            }
        }
        let mut batch: Pending = HashMap::new();
        batch.insert(E::NAME, Box::new(pending));
        self.apply(batch).map(|_| ())
    }

    /// Committed entities of type `E`, in identifier order
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Unknown`] if the collection holds another entity type.
    pub fn snapshot<E: Entity>(&self) -> Result<Vec<E>> {
        let store = self.read();
        Ok(store
            .table::<E>()?
            .map(|table| table.rows.values().map(|row| row.entity.clone()).collect())
            .unwrap_or_default())
    }

    /// Make the next `op` fail with `error`
    ///
    /// Faults queue up: two calls for the same operation fail its next two invocations.
    pub fn fail_next(&self, op: StorageOp, error: DataError) {
        self.faults
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((op, error));
    }

    /// Delay every storage operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_fault(&self, op: StorageOp) -> Result<()> {
        let mut queued = self.faults.queued.lock().unwrap_or_else(PoisonError::into_inner);
        match queued.iter().position(|(queued_op, _)| *queued_op == op) {
            Some(index) => Err(queued.remove(index).1),
            None => Ok(()),
        }
    }

    async fn simulate_io(&self, op: StorageOp) -> Result<()> {
        let latency = *self.faults.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.take_fault(op)
    }

    /// Check and apply a batch atomically. Returns the number of changes applied.
    fn apply(&self, pending: Pending) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        let mut store = self.write();
        for changes in pending.values() {
            changes.check(&store)?;
        }
        store.version += 1;
        let version = store.version;
        let mut applied = 0;
        for changes in pending.values() {
            changes.apply(&mut store, version)?;
            applied += changes.len();
        }
        Ok(applied)
    }
}

#[derive(Default)]
struct SessionState {
    transaction: TransactionState,
    pending: Pending,
}

impl SessionState {
    fn pending<E: Entity>(&self) -> Result<Option<&PendingTable<E>>> {
        self.pending.get(E::NAME).map_or(Ok(None), |changes| {
            changes
                .as_any()
                .downcast_ref::<PendingTable<E>>()
                .map(Some)
                .ok_or_else(collection_clash::<E>)
        })
    }

    fn pending_mut<E: Entity>(&mut self) -> Result<&mut PendingTable<E>> {
        self.pending
            .entry(E::NAME)
            .or_insert_with(|| Box::new(PendingTable::<E>::default()))
            .as_any_mut()
            .downcast_mut::<PendingTable<E>>()
            .ok_or_else(collection_clash::<E>)
    }

    fn staged_count(&self) -> usize {
        self.pending.values().map(|changes| changes.len()).sum()
    }
}

/// One unit of work against an [`InMemoryDatabase`].
///
/// Reads see committed rows overlaid with this session's staged changes.
pub struct InMemorySession {
    db: InMemoryDatabase,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemorySession")
            .field("transaction", &state.transaction)
            .field("staged", &state.staged_count())
            .finish_non_exhaustive()
    }
}

impl InMemorySession {
    /// Repository for `E` bound to this session
    #[must_use]
    pub fn repository<E: Entity>(self: &Arc<Self>) -> RepositoryRef<E> {
        Arc::new(InMemoryRepository::<E> {
            session: Arc::clone(self),
            _entity: PhantomData,
        })
    }

    /// Number of staged, unsaved changes
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.lock().staged_count()
    }

    // Lock order: session state before the store.
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed rows overlaid with staged changes, in identifier order.
    fn visible<E: Entity>(&self) -> Result<Vec<E>> {
        let state = self.lock();
        let store = self.db.read();
        let mut rows: BTreeMap<Value, E> = store
            .table::<E>()?
            .map(|table| {
                table
                    .rows
                    .iter()
                    .map(|(id, row)| (id.clone(), row.entity.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(pending) = state.pending::<E>()? {
            for (id, staged) in &pending.changes {
                match staged {
                    Staged::Inserted(entity) | Staged::Updated { entity, .. } => {
                        rows.insert(id.clone(), entity.clone());
                    },
                    Staged::Removed { .. } => {
                        rows.remove(id);
                    },
                }
            }
        }
        Ok(rows.into_values().collect())
    }

    fn matching<E: Entity>(&self, spec: &Specification<E>) -> Result<Vec<E>> {
        let mut rows = self.visible::<E>()?;
        rows.retain(|entity| spec.is_satisfied_by(entity));
        Ok(rows)
    }

    fn stage_add<E: Entity>(&self, entity: E) -> Result<()> {
        let id = entity.id_value();
        let mut state = self.lock();
        state.transaction.ensure_open()?;
        let committed = self.db.read().version_of::<E>(&id)?;
        let pending = state.pending_mut::<E>()?;
        let staged = match pending.changes.get(&id) {
            Some(Staged::Removed { base_version }) => Staged::Updated {
                entity,
                base_version: *base_version,
            },
            Some(_) => return Err(already_exists::<E>(&id)),
            None if committed.is_some() => return Err(already_exists::<E>(&id)),
            None => Staged::Inserted(entity),
        };
        pending.changes.insert(id, staged);
        Ok(())
    }

    fn stage_update<E: Entity>(&self, entity: E) -> Result<()> {
        let id = entity.id_value();
        let mut state = self.lock();
        state.transaction.ensure_open()?;
        let committed = self.db.read().version_of::<E>(&id)?;
        let pending = state.pending_mut::<E>()?;
        let staged = match (pending.changes.get(&id), committed) {
            (Some(Staged::Inserted(_)), _) => Staged::Inserted(entity),
            (Some(Staged::Updated { base_version, .. }), _) => Staged::Updated {
                entity,
                base_version: *base_version,
            },
            (Some(Staged::Removed { .. }), _) | (None, None) => {
                return Err(DataError::not_found(E::NAME, &id));
            },
            (None, Some(base_version)) => Staged::Updated { entity, base_version },
        };
        pending.changes.insert(id, staged);
        Ok(())
    }

    fn stage_remove<E: Entity>(&self, entity: &E) -> Result<()> {
        let id = entity.id_value();
        let mut state = self.lock();
        state.transaction.ensure_open()?;
        let committed = self.db.read().version_of::<E>(&id)?;
        let pending = state.pending_mut::<E>()?;
        match (pending.changes.get(&id), committed) {
            (Some(Staged::Inserted(_)), _) => {
                pending.changes.remove(&id);
            },
            (Some(Staged::Updated { base_version, .. }), _) => {
                let base_version = *base_version;
                pending.changes.insert(id, Staged::Removed { base_version });
            },
            (Some(Staged::Removed { .. }), _) | (None, None) => {
                return Err(DataError::not_found(E::NAME, &id));
            },
            (None, Some(base_version)) => {
                pending.changes.insert(id, Staged::Removed { base_version });
            },
        }
        Ok(())
    }

    /// Apply staged changes after `io` succeeded; on failure the changes are discarded.
    fn flush(&self, state: &mut SessionState, io: Result<()>) -> Result<usize> {
        let pending = std::mem::take(&mut state.pending);
        io.and_then(|()| self.db.apply(pending))
    }
}

fn already_exists<E: Entity>(id: &Value) -> DataError {
    DataError::conflict(format!("{} {id} already exists", E::NAME))
}

impl UnitOfWork for InMemorySession {
    fn begin(&self) -> UnitOfWorkFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.transaction = state.transaction.begin()?;
            tracing::debug!(staged = state.staged_count(), "In-memory transaction started");
            Ok(())
        })
    }

    fn commit(&self) -> UnitOfWorkFuture<'_, ()> {
        Box::pin(async move {
            let io = self.db.simulate_io(StorageOp::Commit).await;
            let mut state = self.lock();
            let committed = state.transaction.commit()?;
            match self.flush(&mut state, io) {
                Ok(applied) => {
                    state.transaction = committed;
                    tracing::debug!(applied, "In-memory transaction committed");
                    Ok(())
                },
                Err(error) => {
                    state.transaction = TransactionState::RolledBack;
                    tracing::warn!(error = %error, "In-memory commit failed, changes discarded");
                    Err(error)
                },
            }
        })
    }

    fn rollback(&self) -> UnitOfWorkFuture<'_, ()> {
        Box::pin(async move {
            let io = self.db.simulate_io(StorageOp::Rollback).await;
            let mut state = self.lock();
            state.transaction = state.transaction.rollback()?;
            let discarded = state.staged_count();
            state.pending.clear();
            tracing::debug!(discarded, "In-memory transaction rolled back");
            io
        })
    }

    fn save_changes(&self) -> UnitOfWorkFuture<'_, usize> {
        Box::pin(async move {
            let io = self.db.simulate_io(StorageOp::Commit).await;
            let mut state = self.lock();
            state.transaction.ensure_implicit()?;
            self.flush(&mut state, io)
        })
    }

    fn state(&self) -> TransactionState {
        self.lock().transaction
    }
}

impl Session for InMemorySession {
    fn repository<E: Entity>(self: &Arc<Self>) -> RepositoryRef<E> {
        Self::repository(self)
    }
}

/// [`Repository`] over an [`InMemorySession`].
pub struct InMemoryRepository<E> {
    session: Arc<InMemorySession>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    fn find(&self, spec: &Specification<E>) -> EntityStream<E> {
        let session = Arc::clone(&self.session);
        let spec = spec.clone();
        Box::pin(async_stream::stream! {
            let rows = match session.db.simulate_io(StorageOp::Query).await {
                Ok(()) => session.matching(&spec),
                Err(error) => Err(error),
            };
            match rows {
                Ok(rows) => {
                    for entity in rows {
                        yield Ok(entity);
                    }
                },
                Err(error) => yield Err(error),
            }
        })
    }

    fn find_slice(
        &self,
        spec: &Specification<E>,
        sort: &SortKey<E>,
        offset: u64,
        limit: u64,
    ) -> RepositoryFuture<'_, Vec<E>> {
        let spec = spec.clone();
        let sort = *sort;
        Box::pin(async move {
            self.session.db.simulate_io(StorageOp::Query).await?;
            let mut rows = self.session.matching(&spec)?;
            rows.sort_by(|a, b| sort.compare(a, b));
            Ok(rows
                .into_iter()
                .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect())
        })
    }

    fn count(&self, spec: &Specification<E>) -> RepositoryFuture<'_, u64> {
        let spec = spec.clone();
        Box::pin(async move {
            self.session.db.simulate_io(StorageOp::Query).await?;
            let rows = self.session.matching(&spec)?;
            Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
        })
    }

    fn add(&self, entity: E) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            self.session.db.simulate_io(StorageOp::Add).await?;
            self.session.stage_add(entity)
        })
    }

    fn update(&self, entity: E) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            self.session.db.simulate_io(StorageOp::Update).await?;
            self.session.stage_update(entity)
        })
    }

    fn remove(&self, entity: &E) -> RepositoryFuture<'_, ()> {
        let entity = entity.clone();
        Box::pin(async move {
            self.session.db.simulate_io(StorageOp::Remove).await?;
            self.session.stage_remove(&entity)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Todo;
    use futures::TryStreamExt;

    async fn all(repo: &RepositoryRef<Todo>) -> Result<Vec<i64>> {
        let todos: Vec<Todo> = repo.find(&Specification::all()).try_collect().await?;
        Ok(todos.into_iter().map(|t| t.id).collect())
    }

    #[tokio::test]
    async fn staged_changes_are_private_until_saved() {
        let db = InMemoryDatabase::new();
        let writer = db.session();
        let reader = db.session();
        let todos = writer.repository::<Todo>();

        assert_eq!(todos.add(Todo::new(2, 1, "b")).await, Ok(()));
        assert_eq!(todos.add(Todo::new(1, 1, "a")).await, Ok(()));
        assert_eq!(all(&todos).await, Ok(vec![1, 2]));
        assert_eq!(all(&reader.repository()).await, Ok(vec![]));

        assert_eq!(writer.save_changes().await, Ok(2));
        assert_eq!(all(&reader.repository()).await, Ok(vec![1, 2]));
        assert_eq!(writer.staged_count(), 0);
    }

    #[tokio::test]
    async fn staging_rejects_duplicates_and_missing_rows() {
        let db = InMemoryDatabase::new();
        assert_eq!(db.seed([Todo::new(1, 1, "a")]), Ok(()));
        let todos = db.session().repository::<Todo>();

        assert!(matches!(todos.add(Todo::new(1, 1, "dup")).await, Err(DataError::Conflict(_))));
        assert!(matches!(
            todos.update(Todo::new(9, 1, "ghost")).await,
            Err(DataError::NotFound { .. })
        ));
        assert_eq!(todos.remove(&Todo::new(1, 1, "a")).await, Ok(()));
        assert!(matches!(
            todos.remove(&Todo::new(1, 1, "a")).await,
            Err(DataError::NotFound { .. })
        ));
        // Re-adding a removed row replaces it.
        assert_eq!(todos.add(Todo::new(1, 1, "again")).await, Ok(()));
    }

    #[tokio::test]
    async fn insert_then_remove_cancels_out() {
        let db = InMemoryDatabase::new();
        let session = db.session();
        let todos = session.repository::<Todo>();
        assert_eq!(todos.add(Todo::new(5, 1, "temp")).await, Ok(()));
        assert_eq!(todos.remove(&Todo::new(5, 1, "temp")).await, Ok(()));
        assert_eq!(session.save_changes().await, Ok(0));
        assert_eq!(db.snapshot::<Todo>().map(|rows| rows.len()), Ok(0));
    }

    #[tokio::test]
    async fn concurrent_modification_fails_whole_commit() {
        let db = InMemoryDatabase::new();
        assert_eq!(db.seed([Todo::new(1, 1, "a"), Todo::new(2, 1, "b")]), Ok(()));

        let first = db.session();
        let second = db.session();
        assert_eq!(first.repository::<Todo>().update(Todo::new(1, 1, "first")).await, Ok(()));
        assert_eq!(first.repository::<Todo>().add(Todo::new(3, 1, "c")).await, Ok(()));
        assert_eq!(second.repository::<Todo>().update(Todo::new(1, 1, "second")).await, Ok(()));

        assert_eq!(second.save_changes().await, Ok(1));
        assert_eq!(first.begin().await, Ok(()));
        assert!(matches!(first.commit().await, Err(DataError::Conflict(_))));
        assert_eq!(first.state(), TransactionState::RolledBack);

        let titles: Vec<String> = db
            .snapshot::<Todo>()
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["second".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let db = InMemoryDatabase::new();
        let todos = db.session().repository::<Todo>();
        db.fail_next(StorageOp::Query, DataError::TransientStorage("reset".into()));

        assert_eq!(all(&todos).await, Err(DataError::TransientStorage("reset".into())));
        assert_eq!(all(&todos).await, Ok(vec![]));
    }

    #[tokio::test]
    async fn failed_commit_discards_staged_changes() {
        let db = InMemoryDatabase::new();
        let session = db.session();
        assert_eq!(session.repository::<Todo>().add(Todo::new(1, 1, "a")).await, Ok(()));
        db.fail_next(StorageOp::Commit, DataError::TransientStorage("down".into()));

        assert!(session.save_changes().await.is_err());
        assert_eq!(session.staged_count(), 0);
        assert_eq!(db.snapshot::<Todo>().map(|rows| rows.len()), Ok(0));
    }

    #[tokio::test]
    async fn commit_outside_transaction_is_rejected() {
        let session = InMemoryDatabase::new().session();
        assert!(matches!(
            session.commit().await,
            Err(DataError::InvalidTransactionState(_))
        ));
        assert!(matches!(
            session.rollback().await,
            Err(DataError::InvalidTransactionState(_))
        ));
    }

    #[tokio::test]
    async fn finished_session_rejects_further_work() {
        let db = InMemoryDatabase::new();
        let session = db.session();
        let todos = session.repository::<Todo>();
        assert_eq!(session.begin().await, Ok(()));
        assert_eq!(todos.add(Todo::new(1, 1, "a")).await, Ok(()));
        assert_eq!(session.commit().await, Ok(()));

        assert!(matches!(session.begin().await, Err(DataError::InvalidTransactionState(_))));
        assert!(matches!(session.save_changes().await, Err(DataError::InvalidTransactionState(_))));
        assert!(matches!(
            todos.add(Todo::new(2, 1, "b")).await,
            Err(DataError::InvalidTransactionState(_))
        ));
        assert_eq!(all(&todos).await, Ok(vec![1]));
        assert_eq!(session.state(), TransactionState::Committed);
    }

    #[test]
    fn seed_rejects_duplicate_ids() {
        let db = InMemoryDatabase::new();
        assert!(db.seed([Todo::new(1, 1, "a"), Todo::new(1, 1, "b")]).is_err());
        assert_eq!(db.snapshot::<Todo>().map(|rows| rows.len()), Ok(0));
    }
}
