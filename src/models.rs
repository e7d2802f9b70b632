use std::path::Path;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ApiError;

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are persisted as RFC 3339 text with microsecond precision so
/// that lexical order matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ApiError::internal(format!("Invalid timestamp '{}': {}", raw, e)))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(ApiError::internal(format!("Unknown message role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Serialized `Vec<SourceRecord>`; `None` when the turn used no context.
    pub sources: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Md,
}

impl FileType {
    /// Detects the type from the extension. `.doc` is treated as DOCX.
    pub fn from_filename(filename: &str) -> Result<Self, ApiError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(FileType::Pdf),
            "docx" | "doc" => Ok(FileType::Docx),
            "txt" => Ok(FileType::Txt),
            "md" => Ok(FileType::Md),
            _ => Err(ApiError::UnsupportedFormat(filename.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Md => "md",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            "txt" => Ok(FileType::Txt),
            "md" => Ok(FileType::Md),
            other => Err(ApiError::internal(format!("Unknown file type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_type: FileType,
    pub chunk_count: i64,
    pub uploaded_at: DateTime<Utc>,
    pub processed: bool,
}

/// A ranked chunk returned by the context store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub content: String,
    pub source: String,
    /// Cosine similarity in `[-1, 1]`; higher means closer. Results are
    /// returned in descending score order.
    pub score: f32,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub const WEB_SEARCH_SOURCE: &str = "web_search";

/// Citation attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRecord {
    Document {
        content: String,
        source: String,
        score: f32,
        metadata: Value,
    },
    Web {
        title: String,
        url: String,
        snippet: String,
        source: String,
    },
}

impl From<&SearchResult> for SourceRecord {
    fn from(result: &SearchResult) -> Self {
        SourceRecord::Document {
            content: result.content.clone(),
            source: result.source.clone(),
            score: result.score,
            metadata: result.metadata.clone(),
        }
    }
}

impl From<&WebResult> for SourceRecord {
    fn from(result: &WebResult) -> Self {
        SourceRecord::Web {
            title: result.title.clone(),
            url: result.url.clone(),
            snippet: result.snippet.clone(),
            source: WEB_SEARCH_SOURCE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_type_from_extension() {
        assert_eq!(FileType::from_filename("a.PDF").unwrap(), FileType::Pdf);
        assert_eq!(FileType::from_filename("report.doc").unwrap(), FileType::Docx);
        assert_eq!(FileType::from_filename("notes.md").unwrap(), FileType::Md);
        assert!(matches!(
            FileType::from_filename("data.xyz"),
            Err(ApiError::UnsupportedFormat(_))
        ));
        assert!(FileType::from_filename("no_extension").is_err());
    }

    #[test]
    fn source_records_are_tagged() {
        let web = SourceRecord::from(&WebResult {
            title: "Paris".into(),
            url: "https://example.com".into(),
            snippet: "Capital".into(),
        });
        let value = serde_json::to_value(&web).unwrap();
        assert_eq!(value["type"], "web");
        assert_eq!(value["source"], "web_search");

        let doc = SourceRecord::from(&SearchResult {
            content: "text".into(),
            source: "a.pdf".into(),
            score: 0.5,
            metadata: json!({ "chunk_index": 0 }),
        });
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], "document");
        assert_eq!(value["source"], "a.pdf");
        assert_eq!(value["metadata"]["chunk_index"], 0);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        let parsed = parse_timestamp(&format_timestamp(earlier)).unwrap();
        assert_eq!(parsed.timestamp_micros(), earlier.timestamp_micros());
    }
}
