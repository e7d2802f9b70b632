//! Document chunk storage and similarity search.

mod embedder;
mod splitter;
mod store;

pub use embedder::{cosine_similarity, Embedder, HashingEmbedder};
pub use splitter::TextSplitter;
pub use store::{ChunkMetadata, ContextStore, SqliteContextStore};
