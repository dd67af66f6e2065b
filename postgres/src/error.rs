//! Mapping of `sqlx` failures onto [`DataError`].

use composable_data_core::error::DataError;

/// Classify a `sqlx` error.
///
/// - integrity violations (SQLSTATE class `23`), serialization failures and
///   deadlocks become [`DataError::Conflict`]
/// - connection loss, statement timeouts and pool exhaustion become
///   [`DataError::TransientStorage`]
/// - everything else is [`DataError::Unknown`]
#[must_use]
pub fn map_sqlx_error(error: sqlx::Error) -> DataError {
    match &error {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
            classify_sqlstate(&code, db.message())
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DataError::TransientStorage(error.to_string()),
        _ => DataError::Unknown(error.to_string()),
    }
}

fn classify_sqlstate(code: &str, message: &str) -> DataError {
    match code {
        "40001" | "40P01" => DataError::conflict(format!("concurrent modification: {message}")),
        "57014" | "57P01" | "57P02" | "57P03" => DataError::TransientStorage(message.to_string()),
        _ if code.starts_with("23") => DataError::conflict(message.to_string()),
        _ if code.starts_with("08") => DataError::TransientStorage(message.to_string()),
        _ => DataError::Unknown(format!("{message} (SQLSTATE {code})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_and_serialization_failures_conflict() {
        assert!(matches!(classify_sqlstate("23505", "duplicate key"), DataError::Conflict(_)));
        assert!(matches!(classify_sqlstate("23503", "foreign key"), DataError::Conflict(_)));
        assert!(matches!(classify_sqlstate("40001", "could not serialize"), DataError::Conflict(_)));
    }

    #[test]
    fn test_timeouts_and_connection_loss_are_transient() {
        assert!(classify_sqlstate("57014", "canceling statement").is_retryable());
        assert!(classify_sqlstate("08006", "connection failure").is_retryable());
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_everything_else_is_unknown() {
        assert!(matches!(classify_sqlstate("42P01", "relation missing"), DataError::Unknown(_)));
        assert!(matches!(map_sqlx_error(sqlx::Error::RowNotFound), DataError::Unknown(_)));
    }
}
