use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

pub const UNSUPPORTED_FILE_TYPE: &str = "Unsupported file type. Allowed: PDF, DOCX, TXT, MD";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    /// Context store or web search failure. Callers on the chat path degrade
    /// instead of surfacing this.
    #[error("external service error: {0}")]
    ExternalService(String),
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("processing failed: {0}")]
    Processing(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn external<E: std::fmt::Display>(err: E) -> Self {
        ApiError::ExternalService(err.to_string())
    }

    pub fn completion<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Completion(err.to_string())
    }

    pub fn processing<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Processing(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ExternalService(_) | ApiError::Completion(_) => StatusCode::BAD_GATEWAY,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients, in HTTP bodies and stream `error` events.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
            ApiError::UnsupportedFormat(_) => UNSUPPORTED_FILE_TYPE.to_string(),
            ApiError::ExternalService(msg) => format!("External service error: {}", msg),
            ApiError::Completion(msg) => format!("Completion failed: {}", msg),
            ApiError::Processing(msg) => format!("Error processing document: {}", msg),
            ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            ApiError::NotFound("Thread not found".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::UnsupportedFormat("xyz".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Completion("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Processing("bad pdf".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unsupported_format_uses_fixed_message() {
        let response = ApiError::UnsupportedFormat("report.xyz".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn helpers_wrap_display() {
        let err = ApiError::completion("model offline");
        assert_eq!(err.to_string(), "completion failed: model offline");
        assert!(ApiError::NotFound("x".into()).is_not_found());
        assert!(!ApiError::internal("x").is_not_found());
    }
}
