//! Chat turn orchestration: blocking and streaming.

mod events;
mod locks;
mod orchestrator;
mod title;

pub use events::{ChatEvent, EventStreamEncoder};
pub use locks::ThreadLocks;
pub use orchestrator::{ConversationOrchestrator, TurnRequest, TurnResponse};
pub use title::{clamp_title, generate_title};

#[cfg(test)]
mod tests;
