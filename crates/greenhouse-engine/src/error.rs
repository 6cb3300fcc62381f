//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure that can abort startup. Once the
//! scheduler and hub are running, errors are logged and never propagate.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: greenhouse_core::ConfigError,
    },

    /// Database connection, migration or seeding failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: greenhouse_db::DbError,
    },

    /// The initial catalog could not be read.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying persistence error.
        #[from]
        source: greenhouse_core::PersistError,
    },

    /// The hub server failed to start.
    #[error("hub error: {source}")]
    Hub {
        /// The underlying startup error.
        #[from]
        source: greenhouse_hub::startup::StartupError,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },
}
