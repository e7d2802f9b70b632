use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::config::{SearchProviderKind, SearchSettings};
use crate::core::errors::ApiError;
use crate::models::WebResult;

/// Ranked web lookup.
#[async_trait]
pub trait WebSearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, ApiError>;
}

/// Dispatches to the configured provider. Keyed providers fall back to the
/// DuckDuckGo Instant Answer API when their key is missing or they return
/// nothing.
pub struct ConfiguredSearchClient {
    client: reqwest::Client,
    settings: SearchSettings,
}

impl ConfiguredSearchClient {
    pub fn new(settings: SearchSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self { client, settings })
    }

    async fn keyed_search(&self, query: &str) -> Option<Result<Vec<WebResult>, ApiError>> {
        let s = &self.settings;
        let result = match s.provider {
            SearchProviderKind::Google => {
                let (Some(key), Some(cx)) = (&s.google_api_key, &s.google_engine_id) else {
                    return None;
                };
                let url = format!(
                    "https://www.googleapis.com/customsearch/v1?key={}&cx={}&q={}",
                    key,
                    cx,
                    urlencoding::encode(query)
                );
                self.fetch_json("Google", self.client.get(url))
                    .await
                    .map(|payload| parse_google(&payload))
            }
            SearchProviderKind::Brave => {
                let key = s.brave_api_key.as_ref()?;
                let url = format!(
                    "https://api.search.brave.com/res/v1/web/search?q={}",
                    urlencoding::encode(query)
                );
                let request = self
                    .client
                    .get(url)
                    .header("X-Subscription-Token", key)
                    .header("Accept", "application/json");
                self.fetch_json("Brave", request)
                    .await
                    .map(|payload| parse_brave(&payload))
            }
            SearchProviderKind::Bing => {
                let key = s.bing_api_key.as_ref()?;
                let url = format!(
                    "https://api.bing.microsoft.com/v7.0/search?q={}",
                    urlencoding::encode(query)
                );
                let request = self.client.get(url).header("Ocp-Apim-Subscription-Key", key);
                self.fetch_json("Bing", request)
                    .await
                    .map(|payload| parse_bing(&payload))
            }
            SearchProviderKind::DuckDuckGo => return None,
        };
        Some(result)
    }

    async fn duckduckgo(&self, query: &str) -> Result<Vec<WebResult>, ApiError> {
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_redirect=1&no_html=1",
            urlencoding::encode(query)
        );
        let payload = self.fetch_json("DuckDuckGo", self.client.get(url)).await?;
        Ok(parse_duckduckgo(&payload))
    }

    async fn fetch_json(
        &self,
        provider: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ApiError> {
        let response = request.send().await.map_err(ApiError::external)?;
        if !response.status().is_success() {
            return Err(ApiError::ExternalService(format!(
                "{} search failed: {}",
                provider,
                response.status()
            )));
        }
        response.json().await.map_err(ApiError::external)
    }
}

#[async_trait]
impl WebSearchClient for ConfiguredSearchClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, ApiError> {
        let mut results = match self.keyed_search(query).await {
            Some(Ok(results)) if !results.is_empty() => results,
            Some(Ok(_)) => self.duckduckgo(query).await?,
            Some(Err(err)) => {
                debug!("Keyed search failed, falling back to DuckDuckGo: {}", err);
                self.duckduckgo(query).await?
            }
            None => self.duckduckgo(query).await?,
        };
        results.truncate(max_results);
        Ok(results)
    }
}

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn collect_items(items: Option<&Vec<Value>>, title: &str, url: &str, snippet: &str) -> Vec<WebResult> {
    items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let t = str_field(item, title);
                    let u = str_field(item, url);
                    (!t.is_empty() && !u.is_empty()).then(|| WebResult {
                        title: t.to_string(),
                        url: u.to_string(),
                        snippet: str_field(item, snippet).to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_google(payload: &Value) -> Vec<WebResult> {
    collect_items(
        payload.get("items").and_then(|v| v.as_array()),
        "title",
        "link",
        "snippet",
    )
}

fn parse_brave(payload: &Value) -> Vec<WebResult> {
    collect_items(
        payload
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|v| v.as_array()),
        "title",
        "url",
        "description",
    )
}

fn parse_bing(payload: &Value) -> Vec<WebResult> {
    collect_items(
        payload
            .get("webPages")
            .and_then(|wp| wp.get("value"))
            .and_then(|v| v.as_array()),
        "name",
        "url",
        "snippet",
    )
}

fn parse_duckduckgo(payload: &Value) -> Vec<WebResult> {
    let mut results = Vec::new();

    let abstract_text = str_field(payload, "AbstractText");
    let abstract_url = str_field(payload, "AbstractURL");
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        let heading = str_field(payload, "Heading");
        results.push(WebResult {
            title: if heading.is_empty() {
                topic_title(abstract_text)
            } else {
                heading.to_string()
            },
            url: abstract_url.to_string(),
            snippet: abstract_text.to_string(),
        });
    }

    for key in ["Results", "RelatedTopics"] {
        if let Some(items) = payload.get(key).and_then(|v| v.as_array()) {
            collect_topics(items, &mut results);
        }
    }

    results
}

fn collect_topics(items: &[Value], results: &mut Vec<WebResult>) {
    for item in items {
        if let Some(nested) = item.get("Topics").and_then(|v| v.as_array()) {
            collect_topics(nested, results);
            continue;
        }
        let text = str_field(item, "Text");
        let url = str_field(item, "FirstURL");
        if text.is_empty() || url.is_empty() {
            continue;
        }
        results.push(WebResult {
            title: topic_title(text),
            url: url.to_string(),
            snippet: text.to_string(),
        });
    }
}

fn topic_title(text: &str) -> String {
    text.split(" - ").next().unwrap_or(text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duckduckgo_collects_abstract_and_nested_topics() {
        let payload = json!({
            "Heading": "France",
            "AbstractText": "France is a country in Western Europe.",
            "AbstractURL": "https://en.wikipedia.org/wiki/France",
            "RelatedTopics": [
                { "Text": "Paris - capital of France", "FirstURL": "https://duckduckgo.com/Paris" },
                { "Name": "Cities", "Topics": [
                    { "Text": "Lyon - city", "FirstURL": "https://duckduckgo.com/Lyon" }
                ]},
                { "Text": "", "FirstURL": "https://duckduckgo.com/empty" }
            ]
        });

        let results = parse_duckduckgo(&payload);
        let titles: Vec<_> = results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["France", "Paris", "Lyon"]);
        assert_eq!(results[1].snippet, "Paris - capital of France");
    }

    #[test]
    fn provider_payloads_map_to_web_results() {
        let google = json!({ "items": [
            { "title": "G", "link": "https://g", "snippet": "gs" },
            { "title": "", "link": "https://skip" }
        ]});
        assert_eq!(
            parse_google(&google),
            vec![WebResult { title: "G".into(), url: "https://g".into(), snippet: "gs".into() }]
        );

        let brave = json!({ "web": { "results": [
            { "title": "B", "url": "https://b", "description": "bd" }
        ]}});
        assert_eq!(parse_brave(&brave)[0].snippet, "bd");

        let bing = json!({ "webPages": { "value": [
            { "name": "Bi", "url": "https://bi", "snippet": "bis" }
        ]}});
        assert_eq!(parse_bing(&bing)[0].title, "Bi");
    }

    #[test]
    fn missing_sections_yield_empty() {
        assert!(parse_google(&json!({})).is_empty());
        assert!(parse_brave(&json!({ "web": {} })).is_empty());
        assert!(parse_duckduckgo(&json!({})).is_empty());
    }
}
