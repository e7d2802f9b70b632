//! Uploaded documents: storage, extraction and indexing.

mod extract;
mod service;
mod store;

pub use extract::extract_text;
pub use service::DocumentService;
pub use store::DocumentStore;
