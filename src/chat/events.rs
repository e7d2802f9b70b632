use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::models::SourceRecord;

/// Lifecycle events of a streaming chat turn, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Thinking,
    Retrieving,
    Searching,
    Sources(Vec<SourceRecord>),
    Generating,
    Chunk(String),
    Done { thread_title: String },
    Error { message: String },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Thinking => "thinking",
            ChatEvent::Retrieving => "retrieving",
            ChatEvent::Searching => "searching",
            ChatEvent::Sources(_) => "sources",
            ChatEvent::Generating => "generating",
            ChatEvent::Chunk(_) => "chunk",
            ChatEvent::Done { .. } => "done",
            ChatEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ChatEvent::Thinking
            | ChatEvent::Retrieving
            | ChatEvent::Searching
            | ChatEvent::Generating => json!({ "status": self.name() }),
            ChatEvent::Sources(sources) => json!({ "sources": sources }),
            ChatEvent::Chunk(text) => json!({ "chunk": text }),
            ChatEvent::Done { thread_title } => json!({ "done": true, "thread_title": thread_title }),
            ChatEvent::Error { message } => json!({ "error": message }),
        }
    }

    /// `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error { .. })
    }
}

/// Maps [`ChatEvent`]s to named SSE events.
pub struct EventStreamEncoder;

impl EventStreamEncoder {
    pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

    pub fn encode(event: &ChatEvent) -> Event {
        Event::default()
            .event(event.name())
            .data(event.payload().to_string())
    }

    /// Relays events from the orchestrator until a terminal event or until the
    /// producer drops its sender. Dropping the returned stream closes the
    /// receiver, which the producer observes as a cancellation.
    pub fn into_sse(
        rx: mpsc::Receiver<ChatEvent>,
    ) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
        let mut finished = false;
        let stream = ReceiverStream::new(rx)
            .take_while(move |event| {
                if finished {
                    return false;
                }
                finished = event.is_terminal();
                true
            })
            .map(|event| Ok(Self::encode(&event)));

        Sse::new(stream).keep_alive(KeepAlive::new().interval(Self::KEEP_ALIVE))
    }
}
