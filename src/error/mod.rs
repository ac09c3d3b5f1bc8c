use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed for {key}: {message}")]
    Serialization { key: String, message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised by external collaborators (seed generation, verification,
/// path proposal, tool catalog).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{operation} unavailable: {message} (retries: {retries})")]
    Unavailable {
        operation: String,
        message: String,
        retries: u32,
    },

    #[error("Call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Call failed: {message}")]
    Failed { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Call cancelled")]
    Cancelled,
}

/// Errors from applying outcome feedback to the learning state.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Duplicate feedback event: {event_id}")]
    Duplicate { event_id: String },

    #[error("Session has no chosen path: {session_id}")]
    NoChosenPath { session_id: String },

    #[error("Statistics update for {key} lost the lock race and was dropped")]
    Contended { key: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for collaborator calls
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Result type alias for feedback application
pub type FeedbackResult<T> = Result<T, FeedbackError>;
