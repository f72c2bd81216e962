// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Store error types.

use thiserror::Error;

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQL execution error.
    #[cfg(feature = "database")]
    #[error("SQL error: {0}")]
    SqlError(sqlx::Error),

    /// Migration error.
    #[cfg(feature = "database")]
    #[error("migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    /// Requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Caller-supplied data failed a store-level check.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Could not establish or use the underlying connection.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Anything else.
    #[error("internal store error: {0}")]
    InternalError(String),
}

impl StoreError {
    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this is a duplicate-key error.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("23505") {
                    return Self::DuplicateKey(db_err.message().to_string());
                }
                Self::SqlError(sqlx::Error::Database(db_err))
            }
            other => Self::SqlError(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_helpers() {
        let err = StoreError::NotFound("worker".into());
        assert!(err.is_not_found());
        assert!(!err.is_duplicate_key());
    }
}
