//! Error types for RustMention
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//!
//! The mention pipelines catch their own errors at the pipeline boundary
//! and translate them into persisted state (notes + status columns), so
//! most of these variants never reach a client. The `IntoResponse` impl
//! exists for the handlers that do surface them (`/get`, admin commands).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application, including every failure category the
/// mention verification and submission pipelines distinguish.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Source URL unreachable, non-2xx, or wrong content-type.
    /// `transient` marks failures worth retrying (network errors, 5xx,
    /// 429); other 4xx statuses are permanent.
    #[error("Source '{url}' could not be fetched")]
    SourceNotAccessible { url: String, transient: bool },

    /// Source fetched OK but does not contain a link to the target.
    /// The mention is still stored, unvalidated.
    #[error("Source does not contain a link to '{target}'")]
    SourceDoesNotLink { target: String },

    /// Target host is not the configured local domain
    #[error("Target '{0}' is not on our domain")]
    TargetWrongDomain(String),

    /// Target URL doesn't resolve to any content here
    #[error("Target '{0}' does not exist")]
    TargetDoesNotExist(String),

    /// URL matched a registered route that carries no model
    #[error("No model declared for URL path '{0}'")]
    NoModelForUrlPath(String),

    /// Route declares a model that cannot be loaded
    #[error("Bad URL configuration: {0}")]
    BadUrlConfig(String),

    /// Domain allow/deny filter rejected this URL
    #[error("URL '{0}' rejected by domain configuration")]
    RejectedByConfig(String),

    /// A microformat item lacks the fields we require
    #[error("Not enough data: {0}")]
    NotEnoughData(String),

    /// A Mentionable entity omits a required capability
    #[error("Implementation required: {0}")]
    ImplementationRequired(String),

    /// An optional integration is absent; callers continue on the primary path
    #[error("Optional dependency missing: {0}")]
    OptionalDependency(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Whether a retry of the failed operation can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::SourceNotAccessible { transient, .. } => *transient,
            AppError::HttpClient(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::SourceNotAccessible { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string(), "source_fetch")
            }
            AppError::SourceDoesNotLink { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string(), "source_no_link")
            }
            AppError::TargetWrongDomain(_) => {
                (StatusCode::BAD_REQUEST, self.to_string(), "wrong_domain")
            }
            AppError::TargetDoesNotExist(_) => {
                (StatusCode::NOT_FOUND, self.to_string(), "target_missing")
            }
            AppError::NoModelForUrlPath(_) => {
                (StatusCode::NOT_FOUND, self.to_string(), "no_model")
            }
            AppError::BadUrlConfig(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
                "bad_url_config",
            ),
            AppError::RejectedByConfig(_) => (
                StatusCode::FORBIDDEN,
                self.to_string(),
                "rejected_by_config",
            ),
            AppError::NotEnoughData(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg.clone(),
                "not_enough_data",
            ),
            AppError::ImplementationRequired(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
                "implementation_required",
            ),
            AppError::OptionalDependency(msg) => (
                StatusCode::NOT_IMPLEMENTED,
                msg.clone(),
                "optional_dependency",
            ),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string(), "http_client"),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
