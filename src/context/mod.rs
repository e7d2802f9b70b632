//! Context gathering and prompt assembly for chat turns.

mod assembler;
mod prompt;

pub use assembler::{ContextAssembler, GatheredContext};
pub use prompt::build_chat_request;
