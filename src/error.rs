//! Application error types
//!
//! Every fallible operation outside the payment providers returns [`AppResult`].
//! Handlers render an [`AppError`] as the uniform `{"success": false, "error": ...}`
//! body with a status code derived from its kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::database::error::DatabaseError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("No active subscription found")]
    NoActiveSubscription,
}

#[derive(Debug, Clone, Error)]
pub enum ExternalError {
    #[error("{provider} error: {message}")]
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
}

#[derive(Debug, Clone, Error)]
pub enum InfrastructureError {
    #[error("{message}")]
    Configuration { message: String },

    #[error("Database error: {message}")]
    Database { message: String, is_retryable: bool },
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Unauthorized")]
    Forbidden,
}

#[derive(Debug, Clone, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{message}")]
    Validation { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::new(AppErrorKind::Validation {
            message: message.into(),
        })
    }

    pub fn not_found<E: Into<String>, I: Into<String>>(entity: E, id: I) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }))
    }

    pub fn upstream<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: provider.into(),
            message: message.into(),
            is_retryable: true,
        }))
    }

    pub fn unauthenticated() -> Self {
        Self::new(AppErrorKind::Auth(AuthError::Unauthenticated))
    }

    pub fn forbidden() -> Self {
        Self::new(AppErrorKind::Auth(AuthError::Forbidden))
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::NotFound { .. })
                | AppErrorKind::Domain(DomainError::NoActiveSubscription)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(_) => StatusCode::NOT_FOUND,
            AppErrorKind::External(_) => StatusCode::BAD_GATEWAY,
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppErrorKind::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            AppErrorKind::Auth(_) => StatusCode::UNAUTHORIZED,
            AppErrorKind::Validation { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to hand back to a client.
    pub fn public_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                "An internal error occurred. Please try again.".to_string()
            }
            kind => kind.to_string(),
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        if err.is_not_found() {
            return AppError::not_found("Record", "unknown").with_context(err.to_string());
        }
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, context = ?self.context, "request failed");
        }

        let body = json!({
            "success": false,
            "error": self.public_message(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_error_kind() {
        assert_eq!(
            AppError::configuration("missing").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::unauthenticated().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden().status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::upstream("Paystack", "boom").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::not_found("Subscription", "u1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::validation("tier is required").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_database_errors_are_not_leaked() {
        let err = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "relation \"subscriptions\" does not exist".to_string(),
            is_retryable: false,
        }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("subscriptions"));
    }

    #[test]
    fn test_upstream_errors_are_retryable() {
        assert!(AppError::upstream("Paystack", "timeout").is_retryable());
        assert!(!AppError::forbidden().is_retryable());
    }
}
