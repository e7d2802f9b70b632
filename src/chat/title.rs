use std::sync::Arc;

use crate::core::config::defaults::TITLE_MAX_CHARS;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, CompletionClient};

const TITLE_MAX_TOKENS: u32 = 20;

/// Asks the model for a short (at most five words) title for a new thread.
pub async fn generate_title(
    client: &Arc<dyn CompletionClient>,
    first_message: &str,
) -> Result<String, ApiError> {
    let prompt = format!(
        "Generate a short, concise title (max 5 words) for a conversation that starts with: '{}'. \
         Return only the title, nothing else.",
        first_message
    );
    let request = ChatRequest::new(vec![ChatMessage::user(prompt)]).with_max_tokens(TITLE_MAX_TOKENS);

    let raw = client.complete(request).await?;
    Ok(clamp_title(&raw))
}

/// Trims surrounding whitespace and quotes, then hard-truncates to 50 chars.
pub fn clamp_title(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    trimmed.chars().take(TITLE_MAX_CHARS).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_trims_and_truncates() {
        assert_eq!(clamp_title("  \"Capital of France\"\n"), "Capital of France");
        let long = "word ".repeat(30);
        let clamped = clamp_title(&long);
        assert!(clamped.chars().count() <= 50);
        assert!(!clamped.ends_with(' '));
    }

    #[test]
    fn clamp_counts_characters_not_bytes() {
        let title = "é".repeat(80);
        assert_eq!(clamp_title(&title).chars().count(), 50);
    }
}
