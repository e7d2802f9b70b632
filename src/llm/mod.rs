pub mod openai;
pub mod provider;
pub mod types;

pub use openai::{OpenAiCompatibleProvider, OpenAiEmbedder};
pub use provider::CompletionClient;
pub use types::{ChatMessage, ChatRequest};
