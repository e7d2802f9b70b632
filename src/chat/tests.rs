use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;
use crate::context::ContextAssembler;
use crate::core::config::AppSettings;
use crate::core::db;
use crate::core::errors::ApiError;
use crate::history::{Exchange, HistoryStore};
use crate::llm::{ChatRequest, CompletionClient};
use crate::models::{MessageRole, SearchResult, SourceRecord, WebResult};
use crate::rag::{ChunkMetadata, ContextStore};
use crate::tools::WebSearchClient;

const GENERATED_TITLE: &str = "French Capital Question";

struct FakeCompletion {
    chunks: Vec<String>,
    fail: bool,
    fail_after: Option<usize>,
    chunk_delay: Duration,
    chat_requests: Mutex<Vec<ChatRequest>>,
    title_calls: AtomicUsize,
}

impl FakeCompletion {
    fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail: false,
            fail_after: None,
            chunk_delay: Duration::ZERO,
            chat_requests: Mutex::new(Vec::new()),
            title_calls: AtomicUsize::new(0),
        }
    }

    fn is_title_request(request: &ChatRequest) -> bool {
        request
            .last_user_content()
            .map(|c| c.starts_with("Generate a short, concise title"))
            .unwrap_or(false)
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().unwrap().clone()
    }

    fn titles(&self) -> usize {
        self.title_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError> {
        if Self::is_title_request(&request) {
            self.title_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(format!("  {}  ", GENERATED_TITLE));
        }
        self.chat_requests.lock().unwrap().push(request);
        if self.fail {
            return Err(ApiError::Completion("model offline".into()));
        }
        Ok(self.chunks.concat())
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        self.chat_requests.lock().unwrap().push(request);
        if self.fail {
            return Err(ApiError::Completion("model offline".into()));
        }

        let (tx, rx) = mpsc::channel(4);
        let chunks = self.chunks.clone();
        let delay = self.chunk_delay;
        let fail_after = self.fail_after;
        tokio::spawn(async move {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if fail_after == Some(i) {
                    let _ = tx.send(Err(ApiError::Completion("stream broke".into()))).await;
                    return;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        });
        Ok(rx)
    }
}

#[derive(Default)]
struct FakeStore {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ContextStore for FakeStore {
    async fn upsert(&self, chunks: Vec<String>, _metadata: ChunkMetadata) -> Result<usize, ApiError> {
        Ok(chunks.len())
    }

    async fn query(&self, _text: &str, k: usize) -> Result<Vec<SearchResult>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ApiError::ExternalService("index unavailable".into()));
        }
        Ok(vec![SearchResult {
            content: "Paris is the capital of France.".into(),
            source: "france.txt".into(),
            score: 0.92,
            metadata: json!({ "chunk_index": 0 }),
        }]
        .into_iter()
        .take(k)
        .collect())
    }

    async fn delete(&self, _document_id: &str) -> Result<usize, ApiError> {
        Ok(0)
    }
}

#[derive(Default)]
struct FakeSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl WebSearchClient for FakeSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebResult>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![WebResult {
            title: "Paris - Wikipedia".into(),
            url: "https://en.wikipedia.org/wiki/Paris".into(),
            snippet: "Paris is the capital and largest city of France.".into(),
        }])
    }
}

struct Harness {
    _dir: TempDir,
    history: HistoryStore,
    llm: Arc<FakeCompletion>,
    store: Arc<FakeStore>,
    search: Arc<FakeSearch>,
    orchestrator: ConversationOrchestrator,
}

async fn harness_with(llm: FakeCompletion, store: FakeStore) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::connect(&dir.path().join("chat.db"), 4).await.unwrap();
    let history = HistoryStore::new(pool, "New Conversation").await.unwrap();

    let llm = Arc::new(llm);
    let store = Arc::new(store);
    let search = Arc::new(FakeSearch::default());
    let assembler = ContextAssembler::new(store.clone(), search.clone(), 3, 5);
    let orchestrator = ConversationOrchestrator::new(
        history.clone(),
        assembler,
        llm.clone(),
        AppSettings::default().chat,
    );

    Harness {
        _dir: dir,
        history,
        llm,
        store,
        search,
        orchestrator,
    }
}

async fn harness(chunks: &[&str]) -> Harness {
    harness_with(FakeCompletion::new(chunks), FakeStore::default()).await
}

fn turn(thread_id: &str, message: &str, enable_rag: bool, enable_web_search: bool) -> TurnRequest {
    TurnRequest {
        thread_id: thread_id.to_string(),
        message: message.to_string(),
        enable_rag,
        enable_web_search,
    }
}

async fn collect(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn chunk_text(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Chunk(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn first_turn_without_context_persists_pair_and_title() {
    let h = harness(&["The capital ", "of France ", "is Paris."]).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let result = h
        .orchestrator
        .handle_turn(turn(&thread.id, "What is the capital of France?", false, false))
        .await
        .unwrap();

    assert_eq!(result.response, "The capital of France is Paris.");
    assert!(result.sources.is_empty());
    assert_eq!(result.thread_id, thread.id);
    assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);

    let messages = h.history.list_messages(&thread.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "What is the capital of France?");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].sources, None);
    assert!(messages[0].created_at < messages[1].created_at);

    let updated = h.history.get_thread(&thread.id).await.unwrap();
    assert_eq!(updated.title, GENERATED_TITLE);
    assert!(updated.title.chars().count() <= 50);
    assert!(updated.updated_at > thread.updated_at);
    assert_eq!(h.llm.titles(), 1);
}

#[tokio::test]
async fn later_turns_keep_the_title() {
    let h = harness(&["ok"]).await;
    let thread = h.history.create_thread(None).await.unwrap();

    h.orchestrator
        .handle_turn(turn(&thread.id, "first", false, false))
        .await
        .unwrap();
    h.history.update_thread_title(&thread.id, "Renamed").await.unwrap();
    let second = h
        .orchestrator
        .handle_turn(turn(&thread.id, "second", false, false))
        .await
        .unwrap();

    assert_eq!(second.thread_title, "Renamed");
    assert_eq!(h.llm.titles(), 1);
    assert_eq!(h.history.list_messages(&thread.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn prompt_carries_at_most_ten_prior_messages() {
    let h = harness(&["reply"]).await;
    let thread = h.history.create_thread(None).await.unwrap();
    for i in 0..6 {
        h.history
            .commit_exchange(Exchange {
                thread_id: thread.id.clone(),
                user_content: format!("q{}", i),
                assistant_content: format!("a{}", i),
                sources: None,
                title: None,
            })
            .await
            .unwrap();
    }

    h.orchestrator
        .handle_turn(turn(&thread.id, "latest", false, false))
        .await
        .unwrap();

    let request = &h.llm.requests()[0];
    let prior = &request.messages[1..request.messages.len() - 1];
    assert_eq!(prior.len(), 10);
    assert_eq!(prior[0].content, "q1");
    assert_eq!(prior[9].content, "a5");
    assert_eq!(request.messages.last().unwrap().content, "latest");
    assert_eq!(h.llm.titles(), 0);
}

#[tokio::test]
async fn context_sources_are_persisted_and_injected() {
    let h = harness(&["Paris."]).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let result = h
        .orchestrator
        .handle_turn(turn(&thread.id, "capital?", true, true))
        .await
        .unwrap();

    assert_eq!(result.sources.len(), 2);
    assert!(matches!(result.sources[0], SourceRecord::Document { .. }));
    assert!(matches!(result.sources[1], SourceRecord::Web { .. }));

    let system = &h.llm.requests()[0].messages[0].content;
    assert!(system.contains("=== Document Context ===\n[Doc 1] france.txt: Paris is the capital of France."));
    assert!(system.contains("=== Web Search Results ===\n[Web 1] Paris - Wikipedia:"));

    let messages = h.history.list_messages(&thread.id).await.unwrap();
    let stored: Vec<SourceRecord> =
        serde_json::from_str(messages[1].sources.as_deref().unwrap()).unwrap();
    assert_eq!(stored, result.sources);
}

#[tokio::test]
async fn failed_context_lookup_does_not_fail_the_turn() {
    let h = harness_with(
        FakeCompletion::new(&["still answering"]),
        FakeStore {
            fail: true,
            ..Default::default()
        },
    )
    .await;
    let thread = h.history.create_thread(None).await.unwrap();

    let result = h
        .orchestrator
        .handle_turn(turn(&thread.id, "anything", true, false))
        .await
        .unwrap();

    assert_eq!(result.response, "still answering");
    assert!(result.sources.is_empty());
    assert_eq!(h.store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn completion_failure_persists_nothing() {
    let mut llm = FakeCompletion::new(&["never"]);
    llm.fail = true;
    let h = harness_with(llm, FakeStore::default()).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let err = h
        .orchestrator
        .handle_turn(turn(&thread.id, "hello", false, false))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Completion(_)));

    let events = collect(h.orchestrator.stream_turn(turn(&thread.id, "hello", false, false))).await;
    assert!(matches!(events.last(), Some(ChatEvent::Error { .. })));

    assert!(h.history.list_messages(&thread.id).await.unwrap().is_empty());
    assert_eq!(
        h.history.get_thread(&thread.id).await.unwrap().title,
        "New Conversation"
    );
}

#[tokio::test]
async fn missing_thread_is_reported() {
    let h = harness(&["x"]).await;

    let err = h
        .orchestrator
        .handle_turn(turn("missing", "hello", false, false))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let events = collect(h.orchestrator.stream_turn(turn("missing", "hello", true, true))).await;
    assert_eq!(
        events,
        vec![ChatEvent::Error {
            message: "Thread not found".into()
        }]
    );
    assert!(h.llm.requests().is_empty());
}

#[tokio::test]
async fn stream_emits_events_in_protocol_order() {
    let h = harness(&["Par", "is", "."]).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let events = collect(h.orchestrator.stream_turn(turn(&thread.id, "capital?", true, true))).await;
    let names: Vec<_> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec![
            "thinking",
            "retrieving",
            "searching",
            "sources",
            "generating",
            "chunk",
            "chunk",
            "chunk",
            "done"
        ]
    );
    assert_eq!(
        events.last(),
        Some(&ChatEvent::Done {
            thread_title: GENERATED_TITLE.into()
        })
    );
}

#[tokio::test]
async fn stream_without_context_skips_optional_events() {
    let h = harness(&["hi"]).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let events = collect(h.orchestrator.stream_turn(turn(&thread.id, "hello", false, false))).await;
    let names: Vec<_> = events.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["thinking", "generating", "chunk", "done"]);
}

#[tokio::test]
async fn streamed_text_matches_blocking_reply_and_is_stored_before_done() {
    let h = harness(&["The ", "capital ", "is ", "Paris."]).await;
    let streamed_thread = h.history.create_thread(None).await.unwrap();
    let blocking_thread = h.history.create_thread(None).await.unwrap();

    let mut rx = h
        .orchestrator
        .stream_turn(turn(&streamed_thread.id, "capital?", false, false));
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, ChatEvent::Done { .. }) {
            // Done is only sent after the commit.
            let stored = h.history.list_messages(&streamed_thread.id).await.unwrap();
            assert_eq!(stored.len(), 2);
        }
        events.push(event);
    }

    let blocking = h
        .orchestrator
        .handle_turn(turn(&blocking_thread.id, "capital?", false, false))
        .await
        .unwrap();

    assert_eq!(chunk_text(&events), blocking.response);
    let stored = h.history.list_messages(&streamed_thread.id).await.unwrap();
    assert_eq!(stored[1].content, blocking.response);
}

#[tokio::test]
async fn mid_stream_failure_sends_error_and_persists_nothing() {
    let mut llm = FakeCompletion::new(&["a", "b", "c"]);
    llm.fail_after = Some(2);
    let h = harness_with(llm, FakeStore::default()).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let events = collect(h.orchestrator.stream_turn(turn(&thread.id, "hello", false, false))).await;
    assert_eq!(chunk_text(&events), "ab");
    assert!(matches!(events.last(), Some(ChatEvent::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Done { .. })));
    assert!(h.history.list_messages(&thread.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn client_disconnect_mid_stream_leaves_state_unchanged() {
    let mut llm = FakeCompletion::new(&["one ", "two ", "three ", "four"]);
    llm.chunk_delay = Duration::from_millis(50);
    let h = harness_with(llm, FakeStore::default()).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let mut rx = h
        .orchestrator
        .stream_turn(turn(&thread.id, "count", false, false));
    while let Some(event) = rx.recv().await {
        if matches!(event, ChatEvent::Chunk(_)) {
            break;
        }
    }
    drop(rx);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.history.list_messages(&thread.id).await.unwrap().is_empty());
    assert_eq!(
        h.history.get_thread(&thread.id).await.unwrap().title,
        "New Conversation"
    );

    // The thread lock was released, so the next turn proceeds normally.
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        h.orchestrator.handle_turn(turn(&thread.id, "again", false, false)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result.response, "one two three four");
}

#[tokio::test]
async fn concurrent_turns_on_one_thread_are_serialized() {
    let mut llm = FakeCompletion::new(&["reply"]);
    llm.chunk_delay = Duration::from_millis(20);
    let h = harness_with(llm, FakeStore::default()).await;
    let thread = h.history.create_thread(None).await.unwrap();

    let first = h.orchestrator.clone();
    let second = h.orchestrator.clone();
    let (a, b) = tokio::join!(
        first.handle_turn(turn(&thread.id, "alpha", false, false)),
        second.handle_turn(turn(&thread.id, "beta", false, false)),
    );
    a.unwrap();
    b.unwrap();

    let messages = h.history.list_messages(&thread.id).await.unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant
        ]
    );

    let mut prior_counts: Vec<_> = h
        .llm
        .requests()
        .iter()
        .map(|r| r.messages.len() - 2)
        .collect();
    prior_counts.sort();
    assert_eq!(prior_counts, vec![0, 2]);
    assert_eq!(h.llm.titles(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_turns_on_distinct_threads_are_independent() {
    let h = harness(&["The capital ", "of France ", "is Paris."]).await;
    let mut ids = Vec::new();
    for _ in 0..16 {
        ids.push(h.history.create_thread(None).await.unwrap().id);
    }

    let handles: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(n, id)| {
            let orchestrator = h.orchestrator.clone();
            let id = id.clone();
            tokio::spawn(async move {
                if n % 2 == 0 {
                    orchestrator
                        .handle_turn(turn(&id, "What is the capital of France?", false, false))
                        .await
                        .map(|_| ())
                } else {
                    let events =
                        collect(orchestrator.stream_turn(turn(&id, "And of Spain?", false, false)))
                            .await;
                    match events.last() {
                        Some(ChatEvent::Done { .. }) => Ok(()),
                        other => Err(ApiError::internal(format!("stream ended with {:?}", other))),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    for id in &ids {
        let thread = h.history.get_thread(id).await.unwrap();
        assert_eq!(thread.title, GENERATED_TITLE);
        assert_eq!(h.history.list_messages(id).await.unwrap().len(), 2);
    }
}
