//! Error types for the storyline engine

use thiserror::Error;

/// Main error type for storyline operations
///
/// Policy rejections (cooldown, duplicate, active limit) are not errors; they are
/// returned as values by the safety gate. This enum covers infrastructure failures,
/// invalid input and configuration problems.
#[derive(Debug, Error)]
pub enum StorylineError {
    /// Database operation error (from sqlx)
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    /// Database operation error (custom message)
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// External text generation failed or replied with garbage
    #[error("Generation unavailable: {0}")]
    Generation(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Optimistic concurrency check failed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using StorylineError
pub type Result<T> = std::result::Result<T, StorylineError>;

impl StorylineError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        StorylineError::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        StorylineError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        StorylineError::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        StorylineError::NotFound(msg.into())
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        StorylineError::Generation(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        StorylineError::Timeout(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        StorylineError::Conflict(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        StorylineError::Other(msg.into())
    }

    /// Whether this error means the storage layer could not be reached or used.
    ///
    /// The safety gate uses this to decide between its fail-open and fail-closed paths.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            StorylineError::DatabaseSqlx(_) | StorylineError::Database(_) | StorylineError::Io(_)
        )
    }

    /// Whether this error came from the generation collaborator
    pub fn is_generation(&self) -> bool {
        matches!(
            self,
            StorylineError::Generation(_) | StorylineError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StorylineError::validation("title must not be empty");
        assert_eq!(err.to_string(), "Validation error: title must not be empty");

        let err = StorylineError::conflict("storyline changed");
        assert_eq!(err.to_string(), "Conflict: storyline changed");
    }

    #[test]
    fn test_error_classification() {
        assert!(StorylineError::database("locked").is_persistence());
        assert!(!StorylineError::validation("bad").is_persistence());
        assert!(StorylineError::timeout("30s").is_generation());
        assert!(StorylineError::generation("empty reply").is_generation());
        assert!(!StorylineError::not_found("x").is_generation());
    }
}
