use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use guild_core::error::{self, ApiError};
use guild_core::promotion::PromotionEvaluation;
use guild_core::tiers::ConfigurationError;

use crate::repository::RepositoryError;
use crate::trust::TrustError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or invalid credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Authenticated but not allowed (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { message: String },
    /// Promotion rejected; carries the itemized criteria (422)
    Ineligible(Box<PromotionEvaluation>),
    /// Invalid tier or configuration value (500)
    Configuration(ConfigurationError),
    /// Persistence failure (500)
    Repository(RepositoryError),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            message: message.into(),
            docs_hint: Some(
                "Include 'Authorization: Bearer <token>' with an agent API key (guild_sk_...)."
                    .to_string(),
            ),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: message.into(),
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let envelope = |code: &str, message: String| ApiError {
            error: code.to_string(),
            message,
            field: None,
            received: None,
            request_id: request_id.clone(),
            docs_hint: None,
        };

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..envelope(error::codes::VALIDATION_FAILED, message)
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    docs_hint,
                    ..envelope(error::codes::UNAUTHORIZED, message)
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    docs_hint,
                    ..envelope(error::codes::FORBIDDEN, message)
                },
            ),
            AppError::NotFound { message } => (
                StatusCode::NOT_FOUND,
                envelope(error::codes::NOT_FOUND, message),
            ),
            AppError::Ineligible(evaluation) => {
                let unmet: Vec<&str> = evaluation
                    .unmet()
                    .map(|criterion| criterion.name.as_str())
                    .collect();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiError {
                        field: Some("criteria".to_string()),
                        received: serde_json::to_value(&evaluation.criteria).ok(),
                        docs_hint: Some(format!(
                            "Unmet: {}. Check GET /v1/agents/{}/promotion for current progress.",
                            unmet.join(", "),
                            evaluation.agent_id
                        )),
                        ..envelope(error::codes::PROMOTION_INELIGIBLE, evaluation.reason.clone())
                    },
                )
            }
            AppError::Configuration(err) => {
                tracing::error!(error = %err, "configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    envelope(error::codes::CONFIGURATION_ERROR, err.to_string()),
                )
            }
            AppError::Repository(err) => {
                tracing::error!(error = ?err, "repository error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    envelope(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    envelope(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Corrupt(err) => AppError::Configuration(err),
            other => AppError::Repository(other),
        }
    }
}

impl From<TrustError> for AppError {
    fn from(err: TrustError) -> Self {
        match err {
            TrustError::NotFound(agent_id) => AppError::NotFound {
                message: format!("Agent {agent_id} not found"),
            },
            TrustError::Ineligible(evaluation) => AppError::Ineligible(evaluation),
            TrustError::MissingReason => AppError::Validation {
                message: "Demotion requires a non-empty reason".to_string(),
                field: Some("reason".to_string()),
                received: None,
                docs_hint: Some("Send {\"reason\": \"...\"} describing why.".to_string()),
            },
            TrustError::Repository(err) => err.into(),
        }
    }
}
