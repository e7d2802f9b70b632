use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{SearchResult, SourceRecord, WebResult};
use crate::rag::ContextStore;
use crate::tools::WebSearchClient;

/// Output of one [`ContextAssembler::gather`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatheredContext {
    pub rag_results: Vec<SearchResult>,
    pub web_results: Vec<WebResult>,
    /// Document sources in store rank order, then web sources in search rank order.
    pub sources: Vec<SourceRecord>,
}

impl GatheredContext {
    pub fn is_empty(&self) -> bool {
        self.rag_results.is_empty() && self.web_results.is_empty()
    }

    /// Context block injected into the system prompt. Empty sections are
    /// omitted; returns an empty string when there is no context at all.
    pub fn format(&self) -> String {
        let mut sections = Vec::new();

        if !self.rag_results.is_empty() {
            let mut section = String::from("=== Document Context ===");
            for (i, result) in self.rag_results.iter().enumerate() {
                section.push_str(&format!("\n[Doc {}] {}: {}", i + 1, result.source, result.content));
            }
            sections.push(section);
        }

        if !self.web_results.is_empty() {
            let mut section = String::from("=== Web Search Results ===");
            for (i, result) in self.web_results.iter().enumerate() {
                section.push_str(&format!("\n[Web {}] {}: {}", i + 1, result.title, result.snippet));
            }
            sections.push(section);
        }

        sections.join("\n\n")
    }
}

/// Gathers document and web context for a chat turn.
///
/// Lookups that fail are logged and treated as empty so a context outage never
/// fails the turn.
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn ContextStore>,
    search: Arc<dyn WebSearchClient>,
    top_k: usize,
    web_max_results: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ContextStore>,
        search: Arc<dyn WebSearchClient>,
        top_k: usize,
        web_max_results: usize,
    ) -> Self {
        Self {
            store,
            search,
            top_k,
            web_max_results,
        }
    }

    pub async fn gather(&self, query: &str, enable_rag: bool, enable_web_search: bool) -> GatheredContext {
        let (rag_results, web_results) = tokio::join!(
            self.retrieve(query, enable_rag),
            self.web_search(query, enable_web_search)
        );

        let sources = rag_results
            .iter()
            .map(SourceRecord::from)
            .chain(web_results.iter().map(SourceRecord::from))
            .collect();

        GatheredContext {
            rag_results,
            web_results,
            sources,
        }
    }

    async fn retrieve(&self, query: &str, enabled: bool) -> Vec<SearchResult> {
        if !enabled {
            return Vec::new();
        }
        match self.store.query(query, self.top_k).await {
            Ok(results) => {
                debug!("Retrieved {} document chunks", results.len());
                results
            }
            Err(err) => {
                warn!("Document retrieval failed, continuing without it: {}", err);
                Vec::new()
            }
        }
    }

    async fn web_search(&self, query: &str, enabled: bool) -> Vec<WebResult> {
        if !enabled {
            return Vec::new();
        }
        match self.search.search(query, self.web_max_results).await {
            Ok(mut results) => {
                results.truncate(self.web_max_results);
                debug!("Web search returned {} results", results.len());
                results
            }
            Err(err) => {
                warn!("Web search failed, continuing without it: {}", err);
                Vec::new()
            }
        }
    }
}
