//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for docsmith_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => docsmith_core::Error::NotFound(msg),
            DbError::Database(sqlx::Error::PoolTimedOut) => {
                docsmith_core::Error::StorageTimeout("connection pool timed out".to_string())
            }
            other => docsmith_core::Error::Storage(other.to_string()),
        }
    }
}
