//! Translation from `sqlx` failures to [`StoreError`].

use seatkeeper_core::error::StoreError;
use sqlx::error::ErrorKind;
use thiserror::Error;

/// Errors from setting up the store (connecting, migrating).
///
/// Operational failures go through [`StoreError`] instead.
#[derive(Error, Debug)]
pub enum PostgresError {
    /// Could not open the connection pool
    #[error("failed to connect to postgres: {0}")]
    Connect(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// SQLSTATE classes that mean "try again": connection exceptions (08),
/// insufficient resources (53), operator intervention (57).
const TRANSIENT_CLASSES: [&str; 3] = ["08", "53", "57"];

/// Serialization failure and deadlock.
const TRANSIENT_CODES: [&str; 2] = ["40001", "40P01"];

/// Map a driver error, naming the record involved for `NotFound` and `Conflict`.
pub(crate) fn store_error(error: sqlx::Error, what: &str) -> StoreError {
    let mapped = match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(error.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(what.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(error.to_string()),
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => StoreError::Conflict(format!("{what} already exists")),
            ErrorKind::ForeignKeyViolation => StoreError::NotFound(format!("event for {what}")),
            ErrorKind::CheckViolation | ErrorKind::NotNullViolation => {
                StoreError::Invalid(db.message().to_string())
            }
            _ => {
                let code = db.code().unwrap_or_default();
                let code: &str = &code;
                if TRANSIENT_CODES.contains(&code)
                    || TRANSIENT_CLASSES.iter().any(|class| code.starts_with(class))
                {
                    StoreError::Unavailable(error.to_string())
                } else {
                    StoreError::Database(error.to_string())
                }
            }
        },
        _ => StoreError::Database(error.to_string()),
    };

    if mapped.is_transient() {
        tracing::warn!(error = %error, what, "Transient postgres failure");
        metrics::counter!("seatkeeper.store.transient_errors").increment(1);
    }
    mapped
}

/// Shorthand for `map_err(|e| store_error(e, what))`.
pub(crate) trait SqlxResultExt<T> {
    /// Translate the error side
    fn or_store(self, what: &str) -> Result<T, StoreError>;
}

impl<T> SqlxResultExt<T> for Result<T, sqlx::Error> {
    fn or_store(self, what: &str) -> Result<T, StoreError> {
        self.map_err(|error| store_error(error, what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(store_error(sqlx::Error::PoolTimedOut, "event").is_transient());
        assert!(store_error(sqlx::Error::PoolClosed, "event").is_transient());
    }

    #[test]
    fn missing_row_names_the_record() {
        assert_eq!(
            store_error(sqlx::Error::RowNotFound, "payment skp_1"),
            StoreError::NotFound("payment skp_1".to_string())
        );
    }

    #[test]
    fn decode_failures_are_corrupt() {
        let error = sqlx::Error::ColumnNotFound("status".into());
        assert!(matches!(store_error(error, "registration"), StoreError::Corrupt(_)));
    }
}
