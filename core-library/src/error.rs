use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    /// A uniqueness constraint rejected the write (another writer got there first)
    #[error("Conflict: {entity_type} '{name}' already exists")]
    Conflict { entity_type: String, name: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, LibraryError::Conflict { .. })
    }
}

/// True when `err` is a SQLite UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

pub type Result<T> = std::result::Result<T, LibraryError>;
