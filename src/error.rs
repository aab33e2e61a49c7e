use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable name, recorded as `error.type` on spans.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Conflict(_) => "conflict_error",
            AppError::Forbidden(_) => "forbidden_error",
            AppError::Storage(_) => "storage_error",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        match self {
            AppError::Storage(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Storage error");
            }
            AppError::Validation(msg) => {
                warn!(message = %msg, context = %ctx, "Validation error");
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
            }
            AppError::Conflict(msg) => {
                warn!(message = %msg, context = %ctx, "Conflict error");
            }
            AppError::Forbidden(msg) => {
                warn!(message = %msg, context = %ctx, "Forbidden error");
            }
            AppError::Config(msg) => {
                error!(message = %msg, context = %ctx, "Configuration error");
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal error");
            }
        }

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(self.kind()));
            current_span.record("error.message", tracing::field::display(&message));

            match self {
                AppError::Storage(_) | AppError::Internal(_) | AppError::Config(_) => {
                    current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
                }
                _ => {}
            }
        }
    }

    /// Maps a unique-constraint failure to `Conflict`, anything else to `Storage`.
    pub fn from_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(message.into())
            }
            _ => AppError::Storage(err),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn test_non_unique_errors_stay_storage_errors() {
        let err = AppError::from_unique_violation(sqlx::Error::RowNotFound, "duplicate");
        assert!(matches!(err, AppError::Storage(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AppError::Conflict("x".into()).kind(), "conflict_error");
        assert_eq!(AppError::Forbidden("x".into()).kind(), "forbidden_error");
        assert_eq!(
            AppError::Storage(sqlx::Error::PoolTimedOut).kind(),
            "storage_error"
        );
    }
}
