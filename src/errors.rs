use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthorityError>;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl AuthorityError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AuthorityError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AuthorityError::NotFound(what.into())
    }

    /// Storage failures may succeed on retry; validation and lookup failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthorityError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            AuthorityError::validation("name must not be empty").to_string(),
            "validation failed: name must not be empty"
        );
        assert_eq!(
            AuthorityError::not_found("personal access client").to_string(),
            "personal access client not found"
        );
    }

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(!AuthorityError::validation("x").is_retryable());
        assert!(!AuthorityError::not_found("x").is_retryable());
        assert!(AuthorityError::Storage(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
