//! Typed view over the merged YAML config.
//!
//! Every field has a default so an empty config boots a working server:
//! Groq (or OpenAI) completions, hashing embeddings and DuckDuckGo search.

use std::env;

use serde_json::Value;

use super::defaults::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    Groq,
    OpenAi,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    Hashing,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProviderKind {
    DuckDuckGo,
    Google,
    Brave,
    Bing,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub provider: SearchProviderKind,
    pub max_results: usize,
    pub timeout_secs: u64,
    pub google_api_key: Option<String>,
    pub google_engine_id: Option<String>,
    pub brave_api_key: Option<String>,
    pub bing_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub history_limit: usize,
    pub system_prompt: String,
    pub stream_buffer: usize,
    pub default_thread_title: String,
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub rag: RagSettings,
    pub search: SearchSettings,
    pub chat: ChatSettings,
}

impl AppSettings {
    pub fn from_config(config: &Value) -> Self {
        Self::resolve(config, |key| env::var(key).ok())
    }

    /// Builds settings with an explicit environment lookup.
    pub fn resolve<F>(config: &Value, env_lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let groq_key = non_empty(env_lookup("GROQ_API_KEY"));
        let openai_key = non_empty(env_lookup("OPENAI_API_KEY"));

        let provider = match get_str(config, &["llm", "provider"]).as_deref() {
            Some("openai") => LlmProviderKind::OpenAi,
            Some("openai_compatible") => LlmProviderKind::OpenAiCompatible,
            Some("groq") => LlmProviderKind::Groq,
            // Unset: Groq unless only an OpenAI key is available.
            _ if groq_key.is_some() || openai_key.is_none() => LlmProviderKind::Groq,
            _ => LlmProviderKind::OpenAi,
        };

        let (default_base, default_model, env_key) = match provider {
            LlmProviderKind::Groq => (GROQ_BASE_URL, GROQ_DEFAULT_MODEL, groq_key.clone()),
            LlmProviderKind::OpenAi => (OPENAI_BASE_URL, OPENAI_DEFAULT_MODEL, openai_key.clone()),
            LlmProviderKind::OpenAiCompatible => (
                "http://127.0.0.1:1234/v1",
                OPENAI_DEFAULT_MODEL,
                openai_key.clone(),
            ),
        };

        let llm = LlmSettings {
            provider,
            base_url: get_str(config, &["llm", "base_url"]).unwrap_or_else(|| default_base.into()),
            model: get_str(config, &["llm", "model"]).unwrap_or_else(|| default_model.into()),
            api_key: non_empty(get_str(config, &["llm", "api_key"])).or(env_key),
            temperature: get_f64(config, &["llm", "temperature"]).unwrap_or(DEFAULT_TEMPERATURE),
            timeout_secs: get_u64(config, &["llm", "timeout_secs"])
                .unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
        };

        let embedding = EmbeddingSettings {
            provider: match get_str(config, &["embedding", "provider"]).as_deref() {
                Some("openai_compatible") => EmbeddingProviderKind::OpenAiCompatible,
                _ => EmbeddingProviderKind::Hashing,
            },
            base_url: get_str(config, &["embedding", "base_url"])
                .unwrap_or_else(|| OPENAI_BASE_URL.into()),
            model: get_str(config, &["embedding", "model"])
                .unwrap_or_else(|| OPENAI_EMBEDDING_MODEL.into()),
            api_key: non_empty(get_str(config, &["embedding", "api_key"])).or(openai_key),
            dimensions: get_u64(config, &["embedding", "dimensions"])
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
        };

        let rag = RagSettings {
            chunk_size: get_usize(config, &["rag", "chunk_size"]).unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: get_usize(config, &["rag", "chunk_overlap"])
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            top_k: get_usize(config, &["rag", "top_k"]).unwrap_or(DEFAULT_RAG_TOP_K),
        };

        let search = SearchSettings {
            provider: match get_str(config, &["search", "provider"]).as_deref() {
                Some("google") => SearchProviderKind::Google,
                Some("brave") => SearchProviderKind::Brave,
                Some("bing") => SearchProviderKind::Bing,
                _ => SearchProviderKind::DuckDuckGo,
            },
            max_results: get_usize(config, &["search", "max_results"])
                .unwrap_or(DEFAULT_SEARCH_MAX_RESULTS),
            timeout_secs: get_u64(config, &["search", "timeout_secs"])
                .unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS),
            google_api_key: non_empty(get_str(config, &["search", "google_api_key"])),
            google_engine_id: non_empty(get_str(config, &["search", "google_engine_id"])),
            brave_api_key: non_empty(get_str(config, &["search", "brave_api_key"])),
            bing_api_key: non_empty(get_str(config, &["search", "bing_api_key"])),
        };

        let chat = ChatSettings {
            history_limit: get_usize(config, &["chat", "history_limit"])
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
            system_prompt: get_str(config, &["chat", "system_prompt"])
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            stream_buffer: get_usize(config, &["chat", "stream_buffer"])
                .unwrap_or(DEFAULT_STREAM_BUFFER)
                .max(1),
            default_thread_title: get_str(config, &["chat", "default_thread_title"])
                .unwrap_or_else(|| DEFAULT_THREAD_TITLE.into()),
        };

        let port = env_lookup("PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .or_else(|| get_u64(config, &["server", "port"]).map(|v| v as u16))
            .unwrap_or(DEFAULT_PORT);

        let server = ServerSettings {
            host: get_str(config, &["server", "host"]).unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            cors_allowed_origins: get_string_list(config, &["server", "cors_allowed_origins"]),
            max_upload_bytes: get_usize(config, &["server", "max_upload_bytes"])
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        AppSettings {
            server,
            llm,
            embedding,
            rag,
            search,
            chat,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self::resolve(&Value::Null, |_| None)
    }
}

fn lookup<'a>(config: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(config, |node, key| node.get(*key))
}

fn get_str(config: &Value, path: &[&str]) -> Option<String> {
    lookup(config, path)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn get_u64(config: &Value, path: &[&str]) -> Option<u64> {
    lookup(config, path).and_then(|v| v.as_u64())
}

fn get_usize(config: &Value, path: &[&str]) -> Option<usize> {
    get_u64(config, path).map(|v| v as usize)
}

fn get_f64(config: &Value, path: &[&str]) -> Option<f64> {
    lookup(config, path).and_then(|v| v.as_f64())
}

fn get_string_list(config: &Value, path: &[&str]) -> Vec<String> {
    lookup(config, path)
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
