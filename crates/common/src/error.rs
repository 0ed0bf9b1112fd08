//! Error types for warden.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Caller Errors ===
    /// A duration string or wire payload could not be parsed.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The punishment is in a state that does not allow the operation.
    #[error("Illegal state transition: {0}")]
    IllegalStateTransition(String),

    /// A listener vetoed the operation.
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// A generic lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No punishment exists with the given id.
    #[error("Punishment not found: {0}")]
    PunishmentNotFound(String),

    /// No player exists with the given id or name.
    #[error("User not found: {0}")]
    UserNotFound(String),

    // === Server Errors ===
    /// The database rejected or failed a query.
    #[error("Database error: {0}")]
    Database(String),

    /// The mute channel could not reach Redis.
    #[error("Redis error: {0}")]
    Redis(String),

    /// A bounded lookup did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::IllegalStateTransition(_) => "ILLEGAL_STATE_TRANSITION",
            Self::OperationCancelled(_) => "OPERATION_CANCELLED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PunishmentNotFound(_) => "PUNISHMENT_NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    ///
    /// Server errors never expose their detail to players.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::Timeout(_)
                | Self::Config(_)
                | Self::Internal(_)
        )
    }

    /// Returns whether this error is a normal outcome rather than a failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::OperationCancelled(_))
    }

    /// Text that may be shown to the player who triggered the operation.
    ///
    /// Server errors are replaced by a generic message. Nothing is logged;
    /// callers log the error themselves.
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_server_error() {
            return "An internal error occurred. Please contact an administrator.".to_string();
        }

        match self {
            Self::OperationCancelled(_) => "The action was cancelled.".to_string(),
            Self::InvalidFormat(msg) => format!("Invalid input: {msg}"),
            Self::IllegalStateTransition(_) => {
                "This punishment can no longer be modified.".to_string()
            }
            Self::NotFound(_) | Self::PunishmentNotFound(_) => {
                "The requested punishment could not be found.".to_string()
            }
            Self::UserNotFound(_) => "The requested player could not be found.".to_string(),
            _ => self.to_string(),
        }
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct CountEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for CountEvents {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_user_message_emits_no_events() {
        let events = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountEvents(events.clone()));

        tracing::subscriber::with_default(subscriber, || {
            for err in [
                AppError::Database("connection reset".to_string()),
                AppError::PunishmentNotFound("42".to_string()),
                AppError::OperationCancelled("vetoed".to_string()),
            ] {
                let first = err.user_message();
                assert_eq!(err.user_message(), first);
            }
            tracing::info!("counted");
        });

        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = AppError::Timeout("user lookup exceeded 10s".to_string());
        assert!(err.is_server_error());
        assert!(!err.user_message().contains("10s"));

        let err = AppError::Database("duplicate key".to_string());
        assert!(!err.user_message().contains("duplicate"));
    }

    #[test]
    fn test_cancellation_is_not_a_server_error() {
        let err = AppError::OperationCancelled("vetoed by listener".to_string());
        assert!(err.is_cancellation());
        assert!(!err.is_server_error());
        assert_eq!(err.user_message(), "The action was cancelled.");
        assert_eq!(err.error_code(), "OPERATION_CANCELLED");
    }

    #[test]
    fn test_invalid_format_surfaces_input_problem() {
        let err = AppError::InvalidFormat("unknown unit 'w'".to_string());
        assert_eq!(err.error_code(), "INVALID_FORMAT");
        assert!(err.user_message().contains("unknown unit"));
    }
}
