//! Unit of work - grouping staged changes into one atomic commit.
//!
//! A [`Session`] is one unit of work: repositories bound to it stage their
//! mutations there, and they become durable either
//!
//! - implicitly, through [`save_changes`], outside an explicit transaction, or
//! - explicitly, when the effect wrapped by [`in_transaction`] succeeds.
//!
//! # Session scope
//!
//! A session belongs to one business operation. [`in_session`] and
//! [`in_transaction`] rebind the environment to a fresh session through
//! [`OpenSession`], so concurrent operations sharing an environment never
//! see or finish each other's staged changes. Once a transaction commits or
//! rolls back its session is finished; further mutations, saves and
//! transactions on it fail with [`DataError::InvalidTransactionState`].
//!
//! # Nesting
//!
//! Transactions do not nest. Beginning a transaction inside another one
//! fails with [`DataError::InvalidTransactionState`]; the outer transaction
//! then sees that failure and rolls back.

use crate::capability::Has;
use crate::effect::{access, Context, Effect, Scope};
use crate::entity::Entity;
use crate::error::{DataError, Result};
use crate::repository::RepositoryRef;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const NESTED_TRANSACTION: &str = "a transaction is already in progress; nested transactions are not supported";

/// Life-cycle state of a unit-of-work session.
///
/// ```text
/// Idle ──begin──▶ InTransaction ──commit──▶ Committed
///                       │
///                       └──rollback / commit failure──▶ RolledBack
/// ```
///
/// `Committed` and `RolledBack` are terminal: the session is not reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionState {
    /// No explicit transaction has been started
    #[default]
    Idle,
    /// Between `begin` and `commit`/`rollback`
    InTransaction,
    /// The transaction committed
    Committed,
    /// The transaction rolled back
    RolledBack,
}

impl TransactionState {
    /// Returns `true` while an explicit transaction is open.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::InTransaction)
    }

    /// Returns `true` once the session's transaction has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Check that the session still accepts work.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidTransactionState`] once the session is finished.
    pub fn ensure_open(self) -> Result<()> {
        if self.is_terminal() {
            Err(DataError::invalid_state(format!(
                "session is {self}; open a new session for further work"
            )))
        } else {
            Ok(())
        }
    }

    /// Transition for `begin`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidTransactionState`] if a transaction is
    /// already open or the session is finished.
    pub fn begin(self) -> Result<Self> {
        if self.is_active() {
            return Err(DataError::invalid_state(NESTED_TRANSACTION));
        }
        self.ensure_open()?;
        Ok(Self::InTransaction)
    }

    /// Transition for `commit`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidTransactionState`] unless a transaction is open.
    pub fn commit(self) -> Result<Self> {
        if self.is_active() {
            Ok(Self::Committed)
        } else {
            Err(DataError::invalid_state(format!("cannot commit: session is {self}")))
        }
    }

    /// Transition for `rollback`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidTransactionState`] unless a transaction is open.
    pub fn rollback(self) -> Result<Self> {
        if self.is_active() {
            Ok(Self::RolledBack)
        } else {
            Err(DataError::invalid_state(format!("cannot roll back: session is {self}")))
        }
    }

    /// Check that an implicit save is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidTransactionState`] while a transaction is
    /// open or once the session is finished.
    pub fn ensure_implicit(self) -> Result<()> {
        if self.is_active() {
            return Err(DataError::invalid_state(
                "save_changes is not allowed inside an explicit transaction; commit instead",
            ));
        }
        self.ensure_open()
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::InTransaction => "in transaction",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// Boxed future returned by unit-of-work operations.
pub type UnitOfWorkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Transaction boundary of one session.
///
/// Implementations apply staged changes all-or-nothing: after a failed
/// commit no staged change is visible in storage.
///
/// # Concurrent writers
///
/// What happens when two sessions change the same row depends on the
/// backend and is not hidden by this trait. The in-memory engine stages
/// optimistically and fails the later commit with
/// [`DataError::Conflict`]. `PostgreSQL` writes through row locks as
/// mutations are staged, so the second writer waits for the first to finish
/// and then overwrites it.
pub trait UnitOfWork: Send + Sync {
    /// Open an explicit transaction.
    ///
    /// Changes staged earlier in this session and not yet saved join the
    /// transaction.
    fn begin(&self) -> UnitOfWorkFuture<'_, ()>;

    /// Apply every staged change atomically and finish the session.
    ///
    /// On failure the transaction is rolled back and the state becomes
    /// [`TransactionState::RolledBack`].
    fn commit(&self) -> UnitOfWorkFuture<'_, ()>;

    /// Discard every staged change and finish the session.
    fn rollback(&self) -> UnitOfWorkFuture<'_, ()>;

    /// Apply staged changes atomically outside an explicit transaction.
    ///
    /// Returns the number of changes applied.
    fn save_changes(&self) -> UnitOfWorkFuture<'_, usize>;

    /// Current life-cycle state.
    fn state(&self) -> TransactionState;
}

/// A storage session: a [`UnitOfWork`] that hands out repositories bound to it.
pub trait Session: UnitOfWork + Sized + 'static {
    /// Repository for `E` staging into this session.
    fn repository<E: Entity>(self: &Arc<Self>) -> RepositoryRef<E>;
}

/// Environment whose storage capabilities can be rebound to a new session.
///
/// Implementations return a copy of the environment whose repositories and
/// [`UnitOfWorkRef`] all belong to one freshly opened session; every other
/// capability is shared with `self`.
pub trait OpenSession: Sized {
    /// This environment, bound to a fresh session.
    fn open_session(&self) -> Self;
}

/// Shared handle to a [`UnitOfWork`] capability.
pub type UnitOfWorkRef = Arc<dyn UnitOfWork>;

/// Run `effect` as one business operation with its own session.
///
/// Outside any session scope the environment is rebound to a fresh session
/// for the duration of `effect`; changes it stages and does not save are
/// discarded with the session. Inside an operation or transaction `effect`
/// simply joins the current session.
pub fn in_session<Env, T>(effect: Effect<Env, T>) -> Effect<Env, T>
where
    Env: OpenSession + Send + Sync + 'static,
    T: Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        if ctx.scope() != Scope::Environment {
            return effect.run_in(ctx).await;
        }
        ctx.ensure_active()?;
        let scoped = ctx.rescoped(ctx.env().open_session(), Scope::Operation);
        effect.run_in(scoped).await
    })
}

/// Run `effect` inside a transaction on a session of its own.
///
/// Opens a fresh session, begins a transaction, runs `effect`, then commits
/// on success or rolls back on failure. Either way the session is finished
/// afterwards. The effect's own failure is what the caller sees; a failing
/// rollback is logged and does not replace it.
///
/// Calling `in_transaction` inside another transaction fails with
/// [`DataError::InvalidTransactionState`].
///
/// # Example
///
/// ```ignore
/// let transfer = in_transaction(
///     repository::update(debit).and_then(move |()| repository::update(credit)),
/// );
/// ```
pub fn in_transaction<Env, T>(effect: Effect<Env, T>) -> Effect<Env, T>
where
    Env: Has<UnitOfWorkRef> + OpenSession + Send + Sync + 'static,
    T: Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        ctx.ensure_active()?;
        if ctx.scope() == Scope::Transaction {
            return Err(DataError::invalid_state(NESTED_TRANSACTION));
        }

        let ctx = ctx.rescoped(ctx.env().open_session(), Scope::Transaction);
        let unit_of_work: UnitOfWorkRef = ctx.provide();
        unit_of_work.begin().await?;
        tracing::debug!("Transaction started");

        match effect.run_in(ctx).await {
            Ok(value) => {
                unit_of_work.commit().await?;
                tracing::debug!("Transaction committed");
                Ok(value)
            },
            Err(error) => {
                tracing::warn!(error = %error, "Transaction failed, rolling back");
                if let Err(rollback_error) = unit_of_work.rollback().await {
                    tracing::error!(
                        error = %rollback_error,
                        original = %error,
                        "Rollback failed"
                    );
                }
                Err(error)
            },
        }
    })
}

/// Apply staged changes outside an explicit transaction.
///
/// Fails with [`DataError::InvalidTransactionState`] when called while a
/// transaction is open.
pub fn save_changes<Env>() -> Effect<Env, usize>
where
    Env: Has<UnitOfWorkRef> + Send + Sync + 'static,
{
    access(|unit_of_work: UnitOfWorkRef| async move {
        let saved = unit_of_work.save_changes().await?;
        tracing::debug!(saved, "Saved changes");
        Ok(saved)
    })
}

/// Current state of the session the effect runs in.
pub fn transaction_state<Env>() -> Effect<Env, TransactionState>
where
    Env: Has<UnitOfWorkRef> + Send + Sync + 'static,
{
    Effect::new(|ctx: Context<Env>| async move {
        let unit_of_work: UnitOfWorkRef = ctx.provide();
        Ok(unit_of_work.state())
    })
}
