//! Retry with exponential backoff for transient storage failures.
//!
//! Only errors for which [`DataError::is_retryable`] holds are retried.
//! Validation failures, conflicts, missing entities and cancellation reach the
//! caller on the first attempt.
//!
//! An [`Effect`] runs at most once, so retrying takes a *factory* that builds
//! a fresh effect for every attempt.
//!
//! # Example
//!
//! ```ignore
//! use composable_data_runtime::retry::{RetryPolicy, retry_effect};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(50))
//!     .build();
//!
//! let load = retry_effect(policy, move || repository::find_all(spec.clone()));
//! ```

use crate::metrics::RetryMetrics;
use composable_data_core::effect::{Context, Effect};
use composable_data_core::error::Result;
use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 5 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the backoff delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        if !factor.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Run the effect built by `factory`, retrying transient failures.
///
/// Backoff sleeps observe cancellation, so a cancelled execution stops
/// retrying immediately with [`DataError::Cancelled`](composable_data_core::error::DataError::Cancelled).
pub fn retry_effect<Env, T, F>(policy: RetryPolicy, mut factory: F) -> Effect<Env, T>
where
    Env: Send + Sync + 'static,
    T: Send + 'static,
    F: FnMut() -> Effect<Env, T> + Send + 'static,
{
    Effect::new(move |ctx: Context<Env>| async move {
        let mut attempt = 0;
        loop {
            match factory().run_in(ctx.clone()).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "Operation succeeded after retry");
                        RetryMetrics::record_success();
                    }
                    return Ok(value);
                },
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) if attempt >= policy.max_retries => {
                    tracing::error!(attempt, error = %error, "Operation failed after max retries");
                    RetryMetrics::record_exhausted();
                    return Err(error);
                },
                Err(error) => {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Transient failure, retrying"
                    );
                    RetryMetrics::record_attempt();
                    ctx.guard(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                    attempt += 1;
                },
            }
        }
    })
}

/// Retry an effect-independent async operation, using the same rules.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() || attempt >= policy.max_retries => return Err(error),
            Err(error) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(attempt, error = %error, "Transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
