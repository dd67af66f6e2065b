//! Connection pool configuration.

use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// Environment variable present but unparseable
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// `PostgreSQL` connection settings.
///
/// # Example
///
/// ```
/// use composable_data_postgres::PostgresConfig;
/// use std::time::Duration;
///
/// let config = PostgresConfig::new("postgres://localhost/todos")
///     .with_max_connections(20)
///     .with_statement_timeout(Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection URL
    pub database_url: String,
    /// Pool upper bound
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Server-side statement timeout; `None` keeps the server default
    pub statement_timeout: Option<Duration>,
}

impl PostgresConfig {
    /// Defaults: 10 connections max, none kept idle, 30 second acquire timeout.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: None,
        }
    }

    /// Read configuration from the environment.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS`
    /// - `DATABASE_MIN_CONNECTIONS`
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS`
    /// - `DATABASE_STATEMENT_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `DATABASE_URL` is missing, a value does not
    /// parse, or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL").ok_or_else(|| ConfigError::EnvVarNotSet("DATABASE_URL".to_string()))?;
        let mut config = Self::new(url);

        if let Some(max) = parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(min) = parse_var(&lookup, "DATABASE_MIN_CONNECTIONS")? {
            config.min_connections = min;
        }
        if let Some(secs) = parse_var(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS")? {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "DATABASE_STATEMENT_TIMEOUT_MS")? {
            config.statement_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the pool upper bound
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the idle pool size
    #[must_use]
    pub const fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the acquire timeout
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the statement timeout
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationError("database URL is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.statement_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::ValidationError(
                "statement timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_url_is_required() {
        assert_eq!(
            PostgresConfig::from_lookup(lookup(&[])),
            Err(ConfigError::EnvVarNotSet("DATABASE_URL".to_string()))
        );
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let config = PostgresConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/todos"),
            ("DATABASE_MAX_CONNECTIONS", "25"),
            ("DATABASE_STATEMENT_TIMEOUT_MS", "1500"),
        ]));

        let expected = PostgresConfig::new("postgres://db/todos")
            .with_max_connections(25)
            .with_statement_timeout(Duration::from_millis(1500));
        assert_eq!(config, Ok(expected));
    }

    #[test]
    fn test_unparseable_values_are_reported() {
        let config = PostgresConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/todos"),
            ("DATABASE_MIN_CONNECTIONS", "many"),
        ]));
        assert!(matches!(config, Err(ConfigError::InvalidValue { name, .. }) if name == "DATABASE_MIN_CONNECTIONS"));
    }

    #[test]
    fn test_validation() {
        assert!(PostgresConfig::new("").validate().is_err());
        assert!(PostgresConfig::new("postgres://x").with_max_connections(0).validate().is_err());
        assert!(PostgresConfig::new("postgres://x")
            .with_max_connections(2)
            .with_min_connections(3)
            .validate()
            .is_err());
        assert!(PostgresConfig::new("postgres://x")
            .with_statement_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
