//! Ambient capabilities shared by every runtime environment.
//!
//! Entity-shaped capabilities live in [`crate::repository`] and
//! [`crate::unit_of_work`]; this module holds the rest.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock: ClockRef = Arc::new(SystemClock);
///
/// // Test - fixed time for deterministic tests
/// let clock: ClockRef = Arc::new(FixedClock::new(time));
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Shared handle to a [`Clock`] capability.
pub type ClockRef = Arc<dyn Clock>;

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
