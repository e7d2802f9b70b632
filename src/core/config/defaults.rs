pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_RAG_TOP_K: usize = 3;

pub const DEFAULT_SEARCH_MAX_RESULTS: usize = 5;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_STREAM_BUFFER: usize = 32;
pub const DEFAULT_THREAD_TITLE: &str = "New Conversation";
pub const TITLE_MAX_CHARS: usize = 50;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. You provide accurate, helpful, and friendly responses.

When provided with context from documents or web search, use that information to answer questions accurately.
Always cite your sources when using external information.

If you don't know something, say so honestly. Be concise but thorough.";
