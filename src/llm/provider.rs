use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::ApiError;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// provider name for logs (e.g. "groq", "openai")
    fn name(&self) -> &str;

    /// full completion
    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError>;

    /// incremental completion; the receiver closes when the reply is finished.
    /// An `Err` item is terminal.
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;
}
