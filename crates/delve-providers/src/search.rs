use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

const SNIPPET_LIMIT: usize = 300;
const CONTENT_LIMIT: usize = 2_000;
const SCRAPE_LIMIT: usize = 3_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    pub engine: String,
    pub max_sources_per_query: usize,
    pub tavily_api_key: Option<String>,
    pub serpapi_api_key: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            engine: "tavily".to_string(),
            max_sources_per_query: 5,
            tavily_api_key: None,
            serpapi_api_key: None,
        }
    }
}

/// Research-provider collaborator. May legitimately return an empty list;
/// callers degrade that branch rather than failing the batch.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn id(&self) -> &'static str;
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchHit>>;
}

/// Pick a provider by configured preference, falling back to whichever engine
/// has a key, then to the null provider.
pub fn build_search_provider(settings: &SearchSettings) -> Arc<dyn SearchProvider> {
    let tavily_key = settings
        .tavily_api_key
        .clone()
        .or_else(|| std::env::var("TAVILY_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());
    let serpapi_key = settings
        .serpapi_api_key
        .clone()
        .or_else(|| std::env::var("SERPAPI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());

    let preferred = settings.engine.to_ascii_lowercase();
    match (preferred.as_str(), tavily_key, serpapi_key) {
        ("tavily", Some(key), _) => Arc::new(TavilySearch::new(key)),
        ("serpapi", _, Some(key)) => Arc::new(SerpApiSearch::new(key)),
        (_, Some(key), _) => {
            tracing::info!("falling back to tavily search engine");
            Arc::new(TavilySearch::new(key))
        }
        (_, None, Some(key)) => {
            tracing::info!("falling back to serpapi search engine");
            Arc::new(SerpApiSearch::new(key))
        }
        _ => {
            tracing::warn!("no search engine configured; research branches will degrade");
            Arc::new(NullSearch)
        }
    }
}

/// Placeholder provider when no engine key is configured. Always empty.
pub struct NullSearch;

#[async_trait]
impl SearchProvider for NullSearch {
    fn id(&self) -> &'static str {
        "none"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> anyhow::Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }
}

pub struct TavilySearch {
    api_key: String,
    client: Client,
}

impl TavilySearch {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http_client(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn id(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .post("https://api.tavily.com/search")
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results.clamp(1, 10),
                "search_depth": "advanced",
                "include_raw_content": true,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("tavily search failed with status {}: {}", status, text);
        }
        let value: serde_json::Value = response.json().await?;
        let results = value
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let hits = results
            .iter()
            .take(max_results)
            .map(|item| {
                let content = item
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                SearchHit {
                    title: item
                        .get("title")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url: item
                        .get("url")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    snippet: truncate_chars(content, SNIPPET_LIMIT),
                    content: truncate_chars(content, CONTENT_LIMIT),
                }
            })
            .collect();
        Ok(hits)
    }
}

/// SerpAPI returns organic results without page text, so hits that survive
/// ranking get a scrape pass to fill `content`.
pub struct SerpApiSearch {
    api_key: String,
    client: Client,
}

impl SerpApiSearch {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http_client(),
        }
    }

    async fn scrape(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "Mozilla/5.0 (compatible; delve-engine)")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let html = response.text().await.ok()?;
        let text = html2md::parse_html(&html);
        Some(truncate_chars(&text, SCRAPE_LIMIT))
    }
}

#[async_trait]
impl SearchProvider for SerpApiSearch {
    fn id(&self) -> &'static str {
        "serpapi"
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .get("https://serpapi.com/search.json")
            .query(&[
                ("q", query),
                ("api_key", self.api_key.as_str()),
                ("num", &max_results.clamp(1, 10).to_string()),
                ("hl", "en"),
                ("gl", "us"),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("serpapi search failed with status {}: {}", status, text);
        }
        let value: serde_json::Value = response.json().await?;
        let results = value
            .get("organic_results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        for item in results.iter().take(max_results) {
            let url = item
                .get("link")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let content = if url.is_empty() {
                String::new()
            } else {
                self.scrape(&url).await.unwrap_or_default()
            };
            hits.push(SearchHit {
                title: item
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                url,
                snippet: item
                    .get("snippet")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                content,
            });
        }
        Ok(hits)
    }
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

fn truncate_chars(input: &str, limit: usize) -> String {
    if input.chars().count() <= limit {
        input.to_string()
    } else {
        let truncated: String = input.chars().take(limit).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_search_returns_empty() {
        let hits = NullSearch.search("anything", 5).await.expect("hits");
        assert!(hits.is_empty());
    }

    #[test]
    fn preference_falls_back_when_key_missing() {
        let settings = SearchSettings {
            engine: "serpapi".to_string(),
            max_sources_per_query: 5,
            tavily_api_key: Some("tvly-test".to_string()),
            serpapi_api_key: None,
        };
        let provider = build_search_provider(&settings);
        assert_eq!(provider.id(), "tavily");
    }

    #[test]
    fn blank_keys_build_null_provider() {
        // Blank config keys mask any ambient env keys and filter to nothing.
        let settings = SearchSettings {
            engine: "tavily".to_string(),
            max_sources_per_query: 5,
            tavily_api_key: Some(String::new()),
            serpapi_api_key: Some(String::new()),
        };
        let provider = build_search_provider(&settings);
        assert_eq!(provider.id(), "none");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(10);
        let out = truncate_chars(&text, 4);
        assert!(out.starts_with("éééé"));
        assert!(out.ends_with("..."));
    }
}
