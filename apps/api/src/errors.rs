use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::agents::AgentError;
use crate::airtable::AirtableError;
use crate::events::EventError;
use crate::google::GoogleApiError;
use crate::llm_client::LlmError;
use crate::webhooks::WebhookError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("External service error: {0}")]
    External(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AirtableError> for AppError {
    fn from(e: AirtableError) -> Self {
        match e {
            AirtableError::NotFound(id) => AppError::NotFound(id),
            other => AppError::External(other.to_string()),
        }
    }
}

impl From<GoogleApiError> for AppError {
    fn from(e: GoogleApiError) -> Self {
        AppError::External(e.to_string())
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        AppError::Llm(e.to_string())
    }
}

impl From<AgentError> for AppError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::NotFound(what) => AppError::NotFound(what),
            AgentError::InvalidArguments(msg) => AppError::Validation(msg),
            e @ AgentError::Validation(_) => AppError::UnprocessableEntity(e.to_string()),
            AgentError::Airtable(e) => e.into(),
            AgentError::Llm(e) => e.into(),
            other => AppError::External(other.to_string()),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature => AppError::Unauthorized,
            e @ (WebhookError::InvalidPayload(_) | WebhookError::NotConfigured(_)) => {
                AppError::Validation(e.to_string())
            }
            WebhookError::Airtable(e) => e.into(),
            WebhookError::Google(e) => e.into(),
        }
    }
}

impl From<EventError> for AppError {
    fn from(e: EventError) -> Self {
        match e {
            e @ (EventError::Decode(_) | EventError::InvalidCommand(_)) => AppError::Validation(e.to_string()),
            EventError::Agent(e) => e.into(),
            EventError::Google(e) => e.into(),
            EventError::Airtable(e) => e.into(),
            EventError::Database(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                )
            }
            AppError::External(msg) => {
                tracing::error!("External service error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_SERVICE_ERROR",
                    msg.clone(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (status, body) = render(AppError::Validation("table is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "table is required");
    }

    #[tokio::test]
    async fn test_agent_errors_map_to_statuses() {
        let (status, _) = render(AgentError::NotFound("pipeline recX".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = render(AgentError::Google(GoogleApiError::Auth("expired".into())).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "EXTERNAL_SERVICE_ERROR");

        let (status, _) = render(WebhookError::InvalidSignature.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
