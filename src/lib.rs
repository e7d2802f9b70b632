pub mod chat;
pub mod context;
pub mod core;
pub mod documents;
pub mod history;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod state;
pub mod tools;
