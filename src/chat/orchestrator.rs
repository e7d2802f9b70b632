use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::events::ChatEvent;
use super::locks::ThreadLocks;
use super::title::{clamp_title, generate_title};
use crate::context::{build_chat_request, ContextAssembler};
use crate::core::config::ChatSettings;
use crate::core::errors::ApiError;
use crate::history::{Exchange, HistoryStore};
use crate::llm::CompletionClient;
use crate::models::SourceRecord;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub message: String,
    pub enable_rag: bool,
    pub enable_web_search: bool,
}

#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub response: String,
    pub sources: Vec<SourceRecord>,
    pub thread_id: String,
    pub thread_title: String,
}

/// Why a streaming turn stopped before `done`.
enum StreamAbort {
    /// The consumer went away. Nothing is persisted and nothing is reported.
    Cancelled,
    Failed(ApiError),
}

impl From<ApiError> for StreamAbort {
    fn from(err: ApiError) -> Self {
        StreamAbort::Failed(err)
    }
}

/// Drives a chat turn from history load to the committed exchange.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    history: HistoryStore,
    assembler: ContextAssembler,
    llm: Arc<dyn CompletionClient>,
    locks: ThreadLocks,
    settings: ChatSettings,
}

impl ConversationOrchestrator {
    pub fn new(
        history: HistoryStore,
        assembler: ContextAssembler,
        llm: Arc<dyn CompletionClient>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            history,
            assembler,
            llm,
            locks: ThreadLocks::new(),
            settings,
        }
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnResponse, ApiError> {
        let _guard = self.locks.acquire(&request.thread_id).await;

        let thread = self.history.get_thread(&request.thread_id).await?;
        let history = self.history.thread_messages(&thread.id).await?;
        let is_first_turn = history.is_empty();

        let gathered = self
            .assembler
            .gather(&request.message, request.enable_rag, request.enable_web_search)
            .await;

        let chat_request = build_chat_request(
            &self.settings.system_prompt,
            &gathered.format(),
            &history,
            &request.message,
            self.settings.history_limit,
        );

        let response = self.llm.complete(chat_request).await.map_err(|err| {
            error!("Completion via {} failed: {}", self.llm.name(), err);
            err
        })?;

        let title = if is_first_turn {
            Some(self.title_for(&request.message).await)
        } else {
            None
        };

        let committed = self
            .history
            .commit_exchange(Exchange {
                thread_id: thread.id.clone(),
                user_content: request.message.clone(),
                assistant_content: response.clone(),
                sources: serialize_sources(&gathered.sources)?,
                title,
            })
            .await?;

        info!(
            "Completed turn on thread {} ({} sources)",
            thread.id,
            gathered.sources.len()
        );

        Ok(TurnResponse {
            response,
            sources: gathered.sources,
            thread_id: thread.id,
            thread_title: committed.thread.title,
        })
    }

    /// Starts a streaming turn and returns its event sequence. The sequence
    /// ends with exactly one `done` or `error` event unless the receiver is
    /// dropped first, in which case the turn is abandoned without writing.
    pub fn stream_turn(&self, request: TurnRequest) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer);
        let orchestrator = self.clone();

        tokio::spawn(async move {
            match orchestrator.drive_stream(&request, &tx).await {
                Ok(()) => {}
                Err(StreamAbort::Cancelled) => {
                    warn!(
                        "Client disconnected from stream on thread {}; nothing persisted",
                        request.thread_id
                    );
                }
                Err(StreamAbort::Failed(err)) => {
                    if err.is_not_found() {
                        warn!("Stream rejected: {}", err);
                    } else {
                        error!("Streaming turn on thread {} failed: {}", request.thread_id, err);
                    }
                    let _ = tx
                        .send(ChatEvent::Error {
                            message: err.public_message(),
                        })
                        .await;
                }
            }
        });

        rx
    }

    async fn drive_stream(
        &self,
        request: &TurnRequest,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), StreamAbort> {
        let _guard = self.locks.acquire(&request.thread_id).await;

        let thread = self.history.get_thread(&request.thread_id).await?;
        let history = self.history.thread_messages(&thread.id).await?;
        let is_first_turn = history.is_empty();
        emit(tx, ChatEvent::Thinking).await?;

        if request.enable_rag {
            emit(tx, ChatEvent::Retrieving).await?;
        }
        if request.enable_web_search {
            emit(tx, ChatEvent::Searching).await?;
        }
        let gathered = self
            .assembler
            .gather(&request.message, request.enable_rag, request.enable_web_search)
            .await;
        if !gathered.sources.is_empty() {
            emit(tx, ChatEvent::Sources(gathered.sources.clone())).await?;
        }

        let chat_request = build_chat_request(
            &self.settings.system_prompt,
            &gathered.format(),
            &history,
            &request.message,
            self.settings.history_limit,
        );

        emit(tx, ChatEvent::Generating).await?;
        let mut chunks = self.llm.stream(chat_request).await?;
        let mut response = String::new();

        loop {
            tokio::select! {
                item = chunks.recv() => match item {
                    Some(Ok(chunk)) => {
                        response.push_str(&chunk);
                        emit(tx, ChatEvent::Chunk(chunk)).await?;
                    }
                    Some(Err(err)) => return Err(StreamAbort::Failed(err)),
                    None => break,
                },
                _ = tx.closed() => return Err(StreamAbort::Cancelled),
            }
        }

        let title = if is_first_turn {
            Some(self.title_for(&request.message).await)
        } else {
            None
        };

        // Last point where a disconnect still discards the turn.
        if tx.is_closed() {
            return Err(StreamAbort::Cancelled);
        }

        let committed = self
            .history
            .commit_exchange(Exchange {
                thread_id: thread.id.clone(),
                user_content: request.message.clone(),
                assistant_content: response,
                sources: serialize_sources(&gathered.sources)?,
                title,
            })
            .await?;

        info!("Completed streamed turn on thread {}", thread.id);

        if tx
            .send(ChatEvent::Done {
                thread_title: committed.thread.title,
            })
            .await
            .is_err()
        {
            warn!("Client left before done on thread {}; exchange was saved", thread.id);
        }
        Ok(())
    }

    /// Generated title, or the clamped user message when generation fails.
    async fn title_for(&self, message: &str) -> String {
        match generate_title(&self.llm, message).await {
            Ok(title) if !title.is_empty() => title,
            Ok(_) => clamp_title(message),
            Err(err) => {
                warn!("Title generation failed, using message prefix: {}", err);
                clamp_title(message)
            }
        }
    }
}

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<(), StreamAbort> {
    tx.send(event).await.map_err(|_| StreamAbort::Cancelled)
}

fn serialize_sources(sources: &[SourceRecord]) -> Result<Option<String>, ApiError> {
    if sources.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(sources)
        .map(Some)
        .map_err(ApiError::internal)
}
