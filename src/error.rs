use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Root privilege unavailable")]
    PrivilegeDenied,

    #[error("No free LUN slot available")]
    NoFreeSlot,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Privileged execution failed: {0}")]
    Exec(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            AppError::NoFreeSlot.to_string(),
            "No free LUN slot available"
        );
        assert_eq!(
            AppError::NotFound("lun.3".to_string()).to_string(),
            "Not found: lun.3"
        );
    }
}
