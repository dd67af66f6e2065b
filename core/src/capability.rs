//! Capability injection through trait bounds.
//!
//! A runtime environment is any type. It supplies a capability `C` by
//! implementing [`Has<C>`]. Effects that need `C` are generic over an
//! environment bounded by `Has<C>`, so the set of required capabilities is
//! part of every signature and checked by the compiler.
//!
//! Capabilities are cheap, cloneable handles (`Arc<dyn Repository<Todo>>`,
//! `Arc<dyn Clock>`, ...). Bindings are fixed when the environment value is
//! built; a test environment and a live environment bind different
//! implementations for the same capability type.
//!
//! # Example
//!
//! ```
//! use composable_data_core::capability::Has;
//! use composable_data_core::effect::{access, Effect};
//! use composable_data_core::environment::{Clock, ClockRef, SystemClock};
//! use std::sync::Arc;
//!
//! struct AppEnv {
//!     clock: ClockRef,
//! }
//!
//! composable_data_core::provide!(AppEnv { clock: ClockRef });
//!
//! fn current_year<Env: Has<ClockRef> + Send + Sync + 'static>() -> Effect<Env, i32> {
//!     access(|clock: ClockRef| async move {
//!         use chrono::Datelike;
//!         Ok(clock.now().year())
//!     })
//! }
//!
//! let _env = AppEnv { clock: Arc::new(SystemClock) };
//! let _effect = current_year::<AppEnv>();
//! ```
//!
//! Requesting a capability the environment does not provide does not compile:
//!
//! ```compile_fail
//! use composable_data_core::effect::{ask, Effect};
//! use composable_data_core::environment::ClockRef;
//!
//! struct EmptyEnv;
//!
//! // error: the trait `Has<ClockRef>` is not implemented for `EmptyEnv`
//! let _effect: Effect<EmptyEnv, ClockRef> = ask::<EmptyEnv, ClockRef>();
//! ```

/// Environment provides capability `C`.
pub trait Has<C> {
    /// Hand out the bound implementation of `C`.
    fn provide(&self) -> C;
}

/// Implement [`Has`] for each listed field of an environment struct.
///
/// Every field type must be `Clone`; the capability handed out is a clone of
/// the field.
///
/// ```
/// use composable_data_core::environment::{ClockRef, SystemClock};
/// use std::sync::Arc;
///
/// struct TestEnv {
///     clock: ClockRef,
/// }
///
/// composable_data_core::provide!(TestEnv { clock: ClockRef });
///
/// let env = TestEnv { clock: Arc::new(SystemClock) };
/// let _clock: ClockRef = composable_data_core::capability::Has::provide(&env);
/// ```
#[macro_export]
macro_rules! provide {
    ($env:ty { $($field:ident : $capability:ty),* $(,)? }) => {
        $(
            impl $crate::capability::Has<$capability> for $env {
                fn provide(&self) -> $capability {
                    ::std::clone::Clone::clone(&self.$field)
                }
            }
        )*
    };
}
