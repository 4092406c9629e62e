//! Error types for AI Docs Assistant Lambda functions.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in AI Docs Assistant Lambda functions.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication error (missing or bad credentials)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many requests for a rate-limited key
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the caller may retry
        retry_after_secs: u64,
    },

    /// Upstream provider (LLM, email) failed or replied with garbage
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::RateLimited { .. } => 429,
            Error::ExternalService(_) => 502,
            _ => 500,
        }
    }

    /// Message that is safe to return to the client.
    ///
    /// Server-side failures collapse to a generic message; the detail only goes to the log.
    pub fn client_message(&self) -> String {
        match self {
            Error::Validation(msg)
            | Error::Auth(msg)
            | Error::Forbidden(msg)
            | Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::ExternalService(msg) => msg.clone(),
            Error::RateLimited { .. } => "Too many requests. Please try again later.".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Whether this error is the server's fault and should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Map a database error, turning unique violations into [`Error::Conflict`].
    pub fn from_db_unique(err: sqlx::Error, conflict_message: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Error::Conflict(conflict_message.to_string());
            }
        }
        Error::Database(err)
    }

    /// Map a database error from a write that references a user.
    ///
    /// A foreign key violation means the account was deleted while its token was still valid.
    pub fn from_db_owner(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_foreign_key_violation() {
                return Error::Auth("User not found".to_string());
            }
        }
        Error::Database(err)
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(crate::validation::describe(&errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Auth("x".into()).status_code(), 401);
        assert_eq!(Error::Forbidden("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert_eq!(Error::RateLimited { retry_after_secs: 3 }.status_code(), 429);
        assert_eq!(Error::ExternalService("x".into()).status_code(), 502);
        assert_eq!(Error::Aws("x".into()).status_code(), 500);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = Error::Config("JWT_SECRET=hunter2 is too short".into());
        assert_eq!(err.client_message(), "Internal server error");
        assert!(err.is_server_error());

        let err = Error::NotFound("Document not found".into());
        assert_eq!(err.client_message(), "Document not found");
        assert!(!err.is_server_error());
    }

    #[derive(Debug)]
    struct ConstraintError(ErrorKind);

    impl std::fmt::Display for ConstraintError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "constraint violated: {:?}", self.0)
        }
    }

    impl std::error::Error for ConstraintError {}

    impl DatabaseError for ConstraintError {
        fn message(&self) -> &str {
            "constraint violated"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.0 {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                ErrorKind::ForeignKeyViolation => ErrorKind::ForeignKeyViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    fn db_error(kind: ErrorKind) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ConstraintError(kind)))
    }

    #[test]
    fn test_non_unique_db_error_stays_database() {
        let err = Error::from_db_unique(sqlx::Error::RowNotFound, "Email already registered");
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let err = Error::from_db_unique(db_error(ErrorKind::UniqueViolation), "Email already registered");
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.client_message(), "Email already registered");
    }

    #[test]
    fn test_missing_owner_is_unauthorized() {
        let err = Error::from_db_owner(db_error(ErrorKind::ForeignKeyViolation));
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.client_message(), "User not found");

        let err = Error::from_db_owner(db_error(ErrorKind::UniqueViolation));
        assert!(matches!(err, Error::Database(_)));
        assert_eq!(err.client_message(), "Internal server error");
    }
}
