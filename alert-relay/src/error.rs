//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed input, unsupported receiver type, failed rule evaluation.
    /// Surfaced to the caller and never retried automatically.
    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dequeue found nothing eligible. Not a failure.
    #[error("no message found in queue")]
    NoMessage,

    #[error("Delivery failed: {message}")]
    Delivery { retryable: bool, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// A delivery failure that the dead-letter handler may attempt again.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Delivery {
            retryable: true,
            message: msg.into(),
        }
    }

    /// A delivery failure that must not be attempted again.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            retryable: false,
            message: msg.into(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_no_message(&self) -> bool {
        matches!(self, Self::NoMessage)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Delivery { retryable: true, .. })
    }
}
