use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Generic message returned to clients for any store or handler failure
pub const INTERNAL_ERROR_MESSAGE: &str = "Server xatosi";

/// Error response type
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Underlying store message, present on internal errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response type for health check endpoint
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Response type for unhealthy status
#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct UnhealthyResponse {
    pub status: String,
    pub error: String,
}

/// Custom error type for API endpoints
///
/// Only two kinds reach clients: domain validation failures (400) and
/// everything else (500). A missing record is reported the same way as a
/// store outage.
#[derive(Debug)]
pub enum ApiError {
    /// Request rejected by a domain rule
    Validation(String),
    /// Store or handler failure
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    detail: None,
                },
            ),
            ApiError::Internal(err) => {
                tracing::error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: INTERNAL_ERROR_MESSAGE.to_string(),
                        detail: Some(format!("{:#}", err)),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(err).context("Failed to decode stored record"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> ErrorResponse {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let response = ApiError::Validation("already exists".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_of(response).await;
        assert_eq!(body.error, "already exists");
        assert!(body.detail.is_none());
    }

    #[tokio::test]
    async fn test_internal_error_response_carries_detail() {
        let err = anyhow::anyhow!("connection refused").context("Failed to query users");
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_of(response).await;
        assert_eq!(body.error, INTERNAL_ERROR_MESSAGE);
        let detail = body.detail.unwrap();
        assert!(detail.contains("Failed to query users"));
        assert!(detail.contains("connection refused"));
    }
}
