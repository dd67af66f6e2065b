//! `PostgreSQL` storage for Composable Data.
//!
//! Specifications are translated to parameterized SQL, so filtering, counting
//! and slicing happen in the database. Each [`PostgresSession`] is one unit of
//! work: repositories obtained from it share a database transaction that is
//! committed by `save_changes` or by an explicit `begin`/`commit` pair.
//! Sessions are single-use; environments open one per operation through
//! [`PostgresDatabase::session`].
//!
//! # Example
//!
//! ```ignore
//! use composable_data_postgres::{PostgresConfig, PostgresDatabase};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let database = PostgresDatabase::connect(&PostgresConfig::from_env()?).await?;
//!     database.ensure_table::<Todo>().await?;
//!
//!     let session = database.session();
//!     let todos = session.repository::<Todo>();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod repository;
pub mod session;
pub mod sql;

pub use config::{ConfigError, PostgresConfig};
pub use error::map_sqlx_error;
pub use repository::PostgresRepository;
pub use session::PostgresSession;

use composable_data_core::entity::Entity;
use composable_data_core::error::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;

/// Shared connection pool; hands out sessions.
#[derive(Clone, Debug)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`](composable_data_core::error::DataError::Validation)
    /// for an invalid configuration, otherwise the mapped connection failure.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| composable_data_core::error::DataError::validation(e.to_string()))?;

        let mut options = PgConnectOptions::from_str(&config.database_url).map_err(map_sqlx_error)?;
        if let Some(timeout) = config.statement_timeout {
            options = options.options([("statement_timeout", timeout.as_millis().to_string())]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a new unit of work.
    ///
    /// Cheap: no connection is taken until the session first touches the
    /// database.
    #[must_use]
    pub fn session(&self) -> Arc<PostgresSession> {
        Arc::new(PostgresSession::new(self.pool.clone()))
    }

    /// Create the table for `E` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the mapped database error if the DDL fails.
    pub async fn ensure_table<E: Entity>(&self) -> Result<()> {
        sqlx::query(&sql::create_table::<E>())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        tracing::debug!(entity = E::NAME, "Table ensured");
        Ok(())
    }
}
