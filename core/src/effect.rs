//! Effect values - lazily executed descriptions of environment-dependent work.
//!
//! An [`Effect<Env, T>`] describes a computation that needs a runtime
//! environment `Env` and either succeeds with `T` or fails with a
//! [`DataError`]. Building and composing effects performs no I/O; side
//! effects happen only inside [`Effect::run`].
//!
//! # Composition
//!
//! Steps run in the order they are written. [`Effect::and_then`]
//! short-circuits: once a step fails the remaining steps are skipped and the
//! failure reaches the caller unchanged.
//!
//! # Cancellation
//!
//! Execution observes a [`CancellationToken`] before starting and at every
//! capability boundary created with [`access`]. A cancelled execution ends
//! with [`DataError::Cancelled`].
//!
//! # Example
//!
//! ```
//! use composable_data_core::cancel::CancellationToken;
//! use composable_data_core::effect::Effect;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let effect: Effect<(), i32> = Effect::pure(20)
//!     .map(|x| x + 1)
//!     .and_then(|x| Effect::pure(x * 2));
//!
//! let result = effect.run(Arc::new(()), CancellationToken::new()).await;
//! assert_eq!(result, Ok(42));
//! # });
//! ```

use crate::cancel::CancellationToken;
use crate::capability::Has;
use crate::error::{DataError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Which storage session the environment of a [`Context`] is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// The session the environment was built with
    #[default]
    Environment,
    /// A session opened for one business operation
    Operation,
    /// A session opened for one explicit transaction
    Transaction,
}

/// Execution context handed to every step of an effect.
///
/// Carries the shared environment, the cancellation signal and the
/// [`Scope`] of the storage session the environment is bound to.
pub struct Context<Env> {
    env: Arc<Env>,
    cancel: CancellationToken,
    scope: Scope,
}

impl<Env> Clone for Context<Env> {
    fn clone(&self) -> Self {
        Self {
            env: Arc::clone(&self.env),
            cancel: self.cancel.clone(),
            scope: self.scope,
        }
    }
}

impl<Env> Context<Env> {
    /// Create a context for one execution.
    #[must_use]
    pub const fn new(env: Arc<Env>, cancel: CancellationToken) -> Self {
        Self {
            env,
            cancel,
            scope: Scope::Environment,
        }
    }

    /// The same execution, continued against `env` in `scope`.
    #[must_use]
    pub fn rescoped(&self, env: Env, scope: Scope) -> Self {
        Self {
            env: Arc::new(env),
            cancel: self.cancel.clone(),
            scope,
        }
    }

    /// Session scope of the bound environment.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// The runtime environment.
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The cancellation signal of this execution.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Retrieve capability `C` from the environment.
    #[must_use]
    pub fn provide<C>(&self) -> C
    where
        Env: Has<C>,
    {
        self.env.provide()
    }

    /// Fail with [`DataError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Cancelled`] when the token is cancelled.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(DataError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Drive an I/O future, abandoning it as soon as cancellation is requested.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Cancelled`] if the token fires first, otherwise
    /// whatever `operation` returns.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_active()?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DataError::Cancelled),
            result = operation => result,
        }
    }
}

type Runner<Env, T> = Box<dyn FnOnce(Context<Env>) -> BoxFuture<'static, Result<T>> + Send>;

/// A lazily executed, environment-dependent computation.
///
/// See the [module documentation](self) for composition and cancellation rules.
#[must_use = "effects do nothing until they are run"]
pub struct Effect<Env, T> {
    runner: Runner<Env, T>,
}

impl<Env, T> std::fmt::Debug for Effect<Env, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Effect(<deferred>)")
    }
}

impl<Env, T> Effect<Env, T>
where
    Env: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Build an effect from a function of the execution context.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Context<Env>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            runner: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    /// An effect that succeeds with `value`.
    pub fn pure(value: T) -> Self {
        Self::new(move |_| async move { Ok(value) })
    }

    /// An effect that fails with `error`.
    pub fn fail(error: DataError) -> Self {
        Self::new(move |_| async move { Err(error) })
    }

    /// Lift an already computed result.
    pub fn from_result(result: Result<T>) -> Self {
        Self::new(move |_| async move { result })
    }

    /// Defer a pure, fallible computation until execution.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::new(move |_| async move { f() })
    }

    /// Transform the success value.
    pub fn map<U, F>(self, f: F) -> Effect<Env, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Effect::new(move |ctx| async move { self.run_in(ctx).await.map(f) })
    }

    /// Feed the success value into the next effect. Short-circuits on failure.
    pub fn and_then<U, F>(self, f: F) -> Effect<Env, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Effect<Env, U> + Send + 'static,
    {
        Effect::new(move |ctx: Context<Env>| async move {
            let value = self.run_in(ctx.clone()).await?;
            f(value).run_in(ctx).await
        })
    }

    /// Transform the failure value.
    pub fn map_err<F>(self, f: F) -> Self
    where
        F: FnOnce(DataError) -> DataError + Send + 'static,
    {
        Self::new(move |ctx| async move { self.run_in(ctx).await.map_err(f) })
    }

    /// Recover from a failure with another effect.
    pub fn or_else<F>(self, f: F) -> Self
    where
        F: FnOnce(DataError) -> Self + Send + 'static,
    {
        Self::new(move |ctx: Context<Env>| async move {
            match self.run_in(ctx.clone()).await {
                Ok(value) => Ok(value),
                Err(error) => f(error).run_in(ctx).await,
            }
        })
    }

    /// Run `self`, then `other`, and pair the results.
    pub fn zip<U>(self, other: Effect<Env, U>) -> Effect<Env, (T, U)>
    where
        U: Send + 'static,
    {
        self.and_then(move |left| other.map(move |right| (left, right)))
    }

    /// Observe the success value without changing it.
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.map(move |value| {
            f(&value);
            value
        })
    }

    /// Observe the failure without changing it.
    pub fn inspect_err<F>(self, f: F) -> Self
    where
        F: FnOnce(&DataError) + Send + 'static,
    {
        self.map_err(move |error| {
            f(&error);
            error
        })
    }

    /// Interpret this effect inside an existing context.
    ///
    /// Used by combinators that run nested effects on the same environment
    /// and cancellation signal.
    pub fn run_in(self, ctx: Context<Env>) -> BoxFuture<'static, Result<T>> {
        (self.runner)(ctx)
    }

    /// Execute the effect against `env`.
    ///
    /// This is the only point where side effects occur.
    ///
    /// # Errors
    ///
    /// Returns the first failure produced by the composed steps, or
    /// [`DataError::Cancelled`] if `cancel` fires.
    pub async fn run(self, env: Arc<Env>, cancel: CancellationToken) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }
        self.run_in(Context::new(env, cancel)).await
    }
}

/// Retrieve capability `C` from the environment.
pub fn ask<Env, C>() -> Effect<Env, C>
where
    Env: Has<C> + Send + Sync + 'static,
    C: Send + 'static,
{
    Effect::new(|ctx: Context<Env>| async move {
        ctx.ensure_active()?;
        Ok(ctx.provide::<C>())
    })
}

/// Use capability `C` for an I/O step.
///
/// The step is abandoned with [`DataError::Cancelled`] as soon as the
/// execution is cancelled.
pub fn access<Env, C, T, F, Fut>(f: F) -> Effect<Env, T>
where
    Env: Has<C> + Send + Sync + 'static,
    C: Send + 'static,
    T: Send + 'static,
    F: FnOnce(C) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        let capability = ctx.provide::<C>();
        ctx.guard(f(capability)).await
    })
}

/// Run effects one after another, collecting results. Stops at the first failure.
pub fn sequence<Env, T>(effects: Vec<Effect<Env, T>>) -> Effect<Env, Vec<T>>
where
    Env: Send + Sync + 'static,
    T: Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        let mut results = Vec::with_capacity(effects.len());
        for effect in effects {
            results.push(effect.run_in(ctx.clone()).await?);
        }
        Ok(results)
    })
}

/// Run effects concurrently. Fails fast: the first failure is returned and
/// the remaining work is dropped.
pub fn par_all<Env, T>(effects: Vec<Effect<Env, T>>) -> Effect<Env, Vec<T>>
where
    Env: Send + Sync + 'static,
    T: Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        futures::future::try_join_all(effects.into_iter().map(|effect| effect.run_in(ctx.clone())))
            .await
    })
}

/// Run effects concurrently and accumulate every outcome, successes and failures.
pub fn par_all_settled<Env, T>(effects: Vec<Effect<Env, T>>) -> Effect<Env, Vec<Result<T>>>
where
    Env: Send + Sync + 'static,
    T: Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        Ok(
            futures::future::join_all(effects.into_iter().map(|effect| effect.run_in(ctx.clone())))
                .await,
        )
    })
}
