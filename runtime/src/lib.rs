//! # Composable Data Runtime
//!
//! Runtime for Composable Data effects.
//!
//! Effects built with `composable-data-core` are descriptions; this crate
//! executes them against an environment, adding what a long-running service
//! needs around every execution:
//!
//! - **Cancellation**: per call, by timeout, and runtime-wide on shutdown
//! - **Retries**: exponential backoff for transient storage failures
//! - **Observability**: tracing spans and Prometheus metrics
//!
//! ## Example
//!
//! ```ignore
//! use composable_data_runtime::Runtime;
//!
//! let runtime = Runtime::new(TodoAppEnv::in_memory(&db));
//!
//! let page = runtime
//!     .run(paginate(Todo::by_user(7), PageRequest::new(1, 20, SortKey::by_id())?))
//!     .await?;
//! ```

use composable_data_core::cancel::CancellationToken;
use composable_data_core::effect::Effect;
use composable_data_core::error::{DataError, ErrorKind, Result};
use composable_data_core::unit_of_work::{in_session, OpenSession};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

use metrics::EffectMetrics;
use retry::{retry_effect, RetryPolicy};

/// Runtime configuration
///
/// # Example
///
/// ```ignore
/// let config = RuntimeConfig::default()
///     .with_default_timeout(Duration::from_secs(5))
///     .with_retry_policy(RetryPolicy::builder().max_retries(5).build());
///
/// let runtime = Runtime::with_config(env, config);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeConfig {
    /// Timeout applied by [`Runtime::run`]; `None` waits indefinitely
    pub default_timeout: Option<Duration>,
    /// Policy used by [`Runtime::run_with_retry`]
    pub retry_policy: RetryPolicy,
}

impl RuntimeConfig {
    /// Set the default timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Executes effects against one environment.
///
/// Cloning is cheap; clones share the environment and the shutdown signal.
/// Executions never share a storage session, however: each one rebinds the
/// environment to a fresh session through [`OpenSession`].
pub struct Runtime<Env> {
    environment: Arc<Env>,
    config: RuntimeConfig,
    shutdown: CancellationToken,
}

impl<Env> Clone for Runtime<Env> {
    fn clone(&self) -> Self {
        Self {
            environment: Arc::clone(&self.environment),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<Env> Runtime<Env>
where
    Env: OpenSession + Send + Sync + 'static,
{
    /// Create a runtime with default configuration
    #[must_use]
    pub fn new(environment: Env) -> Self {
        Self::with_config(environment, RuntimeConfig::default())
    }

    /// Create a runtime with custom configuration
    #[must_use]
    pub fn with_config(environment: Env, config: RuntimeConfig) -> Self {
        Self::from_shared(Arc::new(environment), config)
    }

    /// Create a runtime over an environment that is shared elsewhere
    #[must_use]
    pub fn from_shared(environment: Arc<Env>, config: RuntimeConfig) -> Self {
        Self {
            environment,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// The bound environment
    #[must_use]
    pub const fn environment(&self) -> &Arc<Env> {
        &self.environment
    }

    /// Runtime configuration
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Cancel every execution started through this runtime and refuse new ones.
    pub fn shutdown(&self) {
        tracing::info!("Runtime shutting down, cancelling in-flight effects");
        self.shutdown.cancel();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Execute `effect`, honouring the configured default timeout.
    ///
    /// # Errors
    ///
    /// Returns the effect's failure, or [`DataError::Cancelled`] on timeout
    /// or shutdown.
    pub async fn run<T>(&self, effect: Effect<Env, T>) -> Result<T>
    where
        T: Send + 'static,
    {
        self.dispatch(in_session(effect)).await
    }

    /// Execute `effect` under a caller-owned cancellation token.
    ///
    /// Each execution is one business operation: it runs on a storage
    /// session of its own (see [`in_session`]). Runtime shutdown also
    /// cancels `token`.
    ///
    /// # Errors
    ///
    /// Returns the effect's failure, or [`DataError::Cancelled`] if `token`
    /// fires or the runtime shuts down.
    pub async fn run_with<T>(&self, effect: Effect<Env, T>, token: CancellationToken) -> Result<T>
    where
        T: Send + 'static,
    {
        self.execute(in_session(effect), token).await
    }

    /// Execute `effect`, cancelling it once `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns the effect's failure, or [`DataError::Cancelled`] on timeout.
    pub async fn run_with_timeout<T>(&self, effect: Effect<Env, T>, timeout: Duration) -> Result<T>
    where
        T: Send + 'static,
    {
        self.execute_with_timeout(in_session(effect), timeout).await
    }

    /// Execute the effect built by `factory`, retrying transient failures
    /// with the configured [`RetryPolicy`].
    ///
    /// Every attempt runs on a fresh storage session, so nothing staged by
    /// a failed attempt leaks into the next.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable failure, or the last transient one
    /// once retries are exhausted.
    pub async fn run_with_retry<T, F>(&self, mut factory: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Effect<Env, T> + Send + 'static,
    {
        let attempt = move || in_session(factory());
        self.dispatch(retry_effect(self.config.retry_policy.clone(), attempt))
            .await
    }

    async fn dispatch<T>(&self, effect: Effect<Env, T>) -> Result<T>
    where
        T: Send + 'static,
    {
        match self.config.default_timeout {
            Some(timeout) => self.execute_with_timeout(effect, timeout).await,
            None => self.execute(effect, CancellationToken::new()).await,
        }
    }

    async fn execute_with_timeout<T>(&self, effect: Effect<Env, T>, timeout: Duration) -> Result<T>
    where
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let timer = token.clone();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Effect timed out");
            timer.cancel();
        });

        let result = self.execute(effect, token).await;
        deadline.abort();
        result
    }

    #[tracing::instrument(skip_all, name = "run_effect")]
    async fn execute<T>(&self, effect: Effect<Env, T>, token: CancellationToken) -> Result<T>
    where
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(DataError::Cancelled);
        }

        let linked = token.clone();
        let shutdown = self.shutdown.clone();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            linked.cancel();
        });

        let start = Instant::now();
        let result = effect.run(Arc::clone(&self.environment), token).await;
        watcher.abort();

        EffectMetrics::record_execution(start.elapsed());
        match &result {
            Ok(_) => tracing::trace!("Effect completed"),
            Err(DataError::Cancelled) => {
                EffectMetrics::record_failure(ErrorKind::Cancelled);
                tracing::debug!("Effect cancelled");
            },
            Err(error) => {
                EffectMetrics::record_failure(error.kind());
                tracing::warn!(error = %error, kind = %error.kind(), "Effect failed");
            },
        }
        result
    }
}
