use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::models::Message;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateThreadRequest {
    pub title: String,
}

pub async fn list_threads(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let threads = state.history.list_threads().await?;
    Ok(Json(threads))
}

pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<CreateThreadRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let title = payload
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let thread = state.history.create_thread(title).await?;
    Ok(Json(thread))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let thread = state.history.get_thread(&thread_id).await?;
    Ok(Json(thread))
}

pub async fn update_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(payload): Json<UpdateThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title must not be empty".to_string()));
    }
    let thread = state.history.update_thread_title(&thread_id, title).await?;
    Ok(Json(thread))
}

pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.history.delete_thread(&thread_id).await?;
    Ok(Json(json!({ "message": "Thread deleted successfully" })))
}

pub async fn get_thread_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.history.list_messages(&thread_id).await?;
    let payload: Vec<Value> = messages.iter().map(message_payload).collect();
    Ok(Json(payload))
}

/// Stored sources are JSON text; clients receive them as a parsed array.
fn message_payload(message: &Message) -> Value {
    let sources = message
        .sources
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .unwrap_or(Value::Null);

    json!({
        "id": message.id,
        "thread_id": message.thread_id,
        "role": message.role,
        "content": message.content,
        "sources": sources,
        "created_at": message.created_at,
    })
}
