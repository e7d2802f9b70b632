use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::chat::{EventStreamEncoder, TurnRequest};
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    pub thread_id: String,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default = "default_enable_rag")]
    pub enable_rag: bool,
}

fn default_enable_rag() -> bool {
    true
}

impl ChatRequestBody {
    fn into_turn(self) -> Result<TurnRequest, ApiError> {
        if self.message.trim().is_empty() {
            return Err(ApiError::BadRequest("Message must not be empty".to_string()));
        }
        Ok(TurnRequest {
            thread_id: self.thread_id,
            message: self.message,
            enable_rag: self.enable_rag,
            enable_web_search: self.enable_web_search,
        })
    }
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let turn = state.orchestrator.handle_turn(payload.into_turn()?).await?;
    Ok(Json(json!({
        "message": turn.response,
        "sources": turn.sources,
        "thread_id": turn.thread_id,
    })))
}

/// Server-sent events for one turn. A missing thread or a failed completion
/// arrives as a terminal `error` event on an otherwise successful response.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.orchestrator.stream_turn(payload.into_turn()?);
    Ok(EventStreamEncoder::into_sse(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_rag_only() {
        let body: ChatRequestBody =
            serde_json::from_value(json!({ "message": "hi", "thread_id": "t" })).unwrap();
        assert!(body.enable_rag);
        assert!(!body.enable_web_search);
    }

    #[test]
    fn blank_message_is_rejected() {
        let body: ChatRequestBody =
            serde_json::from_value(json!({ "message": "  ", "thread_id": "t" })).unwrap();
        assert!(matches!(body.into_turn(), Err(ApiError::BadRequest(_))));
    }
}
