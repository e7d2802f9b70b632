/// Overlapping character-window splitter.
///
/// Each window is at most `chunk_size` characters. When a window ends inside
/// the text, the cut moves back to the best boundary found in the second half
/// of the window: paragraph, then line, then sentence, then whitespace.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SENTENCE_ENDINGS: [&str; 3] = [". ", "! ", "? "];

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let window_end = (start + self.chunk_size).min(total);
            let end = if window_end < total {
                let floor = start + self.chunk_size / 2;
                find_break(&chars, floor, window_end).unwrap_or(window_end)
            } else {
                window_end
            };

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }

            if end >= total {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        chunks
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// Returns the exclusive end index of the preferred cut in `chars[floor..end]`.
fn find_break(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    let window: String = chars[floor..end].iter().collect();
    let offset = |byte_pos: usize| floor + window[..byte_pos].chars().count();

    if let Some(pos) = window.rfind("\n\n") {
        return Some(offset(pos + 2));
    }
    if let Some(pos) = window.rfind('\n') {
        return Some(offset(pos + 1));
    }
    if let Some(pos) = SENTENCE_ENDINGS
        .iter()
        .filter_map(|ending| window.rfind(ending).map(|p| p + ending.len()))
        .max()
    {
        return Some(offset(pos));
    }
    window
        .rfind(char::is_whitespace)
        .map(|pos| offset(pos + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = TextSplitter::new(100, 20).split("  hello world  ");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(TextSplitter::default().split("").is_empty());
        assert!(TextSplitter::default().split("   \n ").is_empty());
    }

    #[test]
    fn chunks_respect_size_and_overlap() {
        let text = "This is a test sentence. ".repeat(20);
        let chunks = TextSplitter::new(100, 20).split(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
        // Adjacent chunks share text from the overlap region.
        let tail: String = chunks[0].chars().rev().take(10).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(chunks[1].contains(tail.trim()));
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let first = "a".repeat(70);
        let text = format!("{}\n\nSecond paragraph. {}", first, "b ".repeat(60));
        let chunks = TextSplitter::new(100, 10).split(&text);
        assert_eq!(chunks[0], first);
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "日本語の文章です。".repeat(50);
        let chunks = TextSplitter::new(40, 5).split(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn unbroken_text_still_progresses() {
        let text = "x".repeat(1000);
        let chunks = TextSplitter::new(100, 99).split(&text);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 1000);
    }
}
