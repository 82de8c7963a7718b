use thiserror::Error;

/// Errors that can occur within the store subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON column (table_types, weekdays) failed to encode.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No row with the given identifier exists.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
