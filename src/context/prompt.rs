use crate::llm::{ChatMessage, ChatRequest};
use crate::models::{Message, MessageRole};

/// System instructions, then the most recent `history_limit` messages
/// (oldest first), then the new user turn.
pub fn build_chat_request(
    system_prompt: &str,
    context: &str,
    history: &[Message],
    user_message: &str,
    history_limit: usize,
) -> ChatRequest {
    let system = if context.is_empty() {
        system_prompt.to_string()
    } else {
        format!("{}\n\nContext:\n{}", system_prompt, context)
    };

    let skip = history.len().saturating_sub(history_limit);
    let mut messages = Vec::with_capacity(history.len() - skip + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history[skip..].iter().map(|m| match m.role {
        MessageRole::User => ChatMessage::user(m.content.clone()),
        MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
    }));
    messages.push(ChatMessage::user(user_message));

    ChatRequest::new(messages)
}
