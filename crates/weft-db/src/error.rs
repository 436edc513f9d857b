//! Database error types.

use thiserror::Error;

/// Database operation errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Row not found.
    #[error("row not found")]
    NotFound,

    /// Duplicate key violation.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Foreign key violation.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Insert or update affected no rows.
    #[error("no rows affected: {0}")]
    NoRowsAffected(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// SQLx error.
    #[error("database error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl DbError {
    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<DbError> for weft_core::EngineError {
    fn from(err: DbError) -> Self {
        weft_core::EngineError::Persistence(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
