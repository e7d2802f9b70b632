use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use super::provider::CompletionClient;
use super::types::ChatRequest;
use crate::core::config::{EmbeddingSettings, LlmProviderKind, LlmSettings};
use crate::core::errors::ApiError;
use crate::rag::Embedder;

const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Chat completions against any OpenAI-compatible endpoint (Groq, OpenAI,
/// LM Studio, Ollama, vLLM...).
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, ApiError> {
        let name = match settings.provider {
            LlmProviderKind::Groq => "groq",
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::OpenAiCompatible => "openai_compatible",
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            name: name.to_string(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            client,
        })
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "stream": stream,
        });
        if let (Some(obj), Some(max_tokens)) = (body.as_object_mut(), request.max_tokens) {
            obj.insert("max_tokens".to_string(), json!(max_tokens));
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(ApiError::completion)?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Completion(format!(
                "{} returned {}: {}",
                self.name, status, text
            )));
        }
        Ok(res)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError> {
        let res = self.post(&self.body(&request, false)).await?;
        let payload: Value = res.json().await.map_err(ApiError::completion)?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::Completion("Response had no message content".to_string()))
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let res = self.post(&self.body(&request, true)).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::completion(e))).await;
                        return;
                    }
                };
                for frame in decoder.push(&bytes) {
                    match frame {
                        SseFrame::Delta(content) => {
                            if tx.send(Ok(content)).await.is_err() {
                                return;
                            }
                        }
                        SseFrame::Done => return,
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum SseFrame {
    Delta(String),
    Done,
}

/// Incremental parser for `data:` lines of a chat-completions stream.
/// Lines may be split across network chunks, so bytes are buffered until a
/// newline arrives.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                frames.push(SseFrame::Done);
                break;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(json) => {
                    if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty() {
                            frames.push(SseFrame::Delta(content.to_string()));
                        }
                    }
                }
                Err(e) => warn!("Skipping malformed stream frame: {}", e),
            }
        }

        frames
    }
}

/// `/embeddings` client for OpenAI-compatible servers.
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let mut builder = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(ApiError::external)?;
        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::ExternalService(format!("Embedding error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::external)?;
        let embeddings = payload["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|item| item["embedding"].as_array())
                    .map(|vals| {
                        vals.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(embeddings)
    }
}
