//! # Composable Data Testing
//!
//! Testing utilities for Composable Data.
//!
//! This crate provides:
//! - An in-memory storage engine with Repository and Unit of Work implementations
//! - Failure and latency injection
//! - Deterministic clock
//! - Fixture entities, named specifications and a ready-made environment
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use composable_data_core::cancel::CancellationToken;
//! use composable_data_core::repository::find_all;
//! use composable_data_testing::fixtures::{todos_with_completion, Todo, TodoAppEnv};
//! use composable_data_testing::memory::InMemoryDatabase;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let db = InMemoryDatabase::new();
//! db.seed(todos_with_completion(&[true, false, true]))?;
//!
//! let env = Arc::new(TodoAppEnv::in_memory(&db));
//! let done = find_all(Todo::is_completed()).run(env, CancellationToken::new()).await?;
//! assert_eq!(done.len(), 2);
//! # Ok::<_, composable_data_core::error::DataError>(())
//! # }).unwrap();
//! ```

pub mod fixtures;
pub mod memory;
pub mod properties;

pub use memory::{InMemoryDatabase, InMemoryRepository, InMemorySession, StorageOp};

/// Mock implementations of environment capabilities.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use composable_data_core::environment::Clock;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until [`advance`](FixedClock::advance)d. Clones
    /// share the current time.
    ///
    /// # Example
    ///
    /// ```
    /// use composable_data_testing::mocks::FixedClock;
    /// use composable_data_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - time1, Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(crate::fixtures::base_time())
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honours `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub use mocks::{test_clock, FixedClock};
