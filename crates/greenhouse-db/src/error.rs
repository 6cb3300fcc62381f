//! Error types for the persistence layer.
//!
//! [`DbError`] wraps the underlying [`sqlx`] errors. At the core boundary
//! every variant collapses into [`PersistError::Backend`] so the store and
//! scheduler never see database types.

use greenhouse_core::PersistError;

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped onto a domain type.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for PersistError {
    fn from(err: DbError) -> Self {
        Self::Backend(err.to_string())
    }
}
