use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CardscanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Only POST method is supported")]
    MethodNotAllowed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl CardscanError {
    pub fn status(&self) -> StatusCode {
        match self {
            CardscanError::Validation(_) => StatusCode::BAD_REQUEST,
            CardscanError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            CardscanError::Storage(_) | CardscanError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CardscanError::Recognition(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CardscanError::RecognitionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CardscanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to hand to an HTTP client.
    pub fn client_message(&self) -> String {
        match self {
            CardscanError::Validation(msg) => msg.clone(),
            CardscanError::MethodNotAllowed => self.to_string(),
            CardscanError::Storage(msg) => msg.clone(),
            // io errors routinely carry absolute paths
            CardscanError::Io(_) => "Failed to store upload".to_string(),
            CardscanError::Recognition(msg) => msg.clone(),
            CardscanError::RecognitionUnavailable(msg) => msg.clone(),
            CardscanError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for CardscanError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.client_message() }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CardscanError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CardscanError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CardscanError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            CardscanError::Storage("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CardscanError::Recognition("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CardscanError::RecognitionUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_error_body_is_flat_json() {
        let response = CardscanError::Validation("No image file provided".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );

        let json = body_json(response).await;
        assert_eq!(json, json!({ "error": "No image file provided" }));
    }

    #[tokio::test]
    async fn test_io_error_hides_paths() {
        let err = std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/tmp/cardscan-abc/0-card.png: permission denied",
        );
        let response = CardscanError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        let message = json["error"].as_str().unwrap();
        assert!(!message.contains("/tmp"), "leaked path: {message}");
    }
}
