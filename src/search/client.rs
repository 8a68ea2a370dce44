//! 搜索协作方接口与 HTTP 实现
//!
//! HttpSearchClient 请求 Tavily 形状的 JSON 接口：POST `{api_key, query, max_results}`，
//! 响应 `results[] {title, url, content}`。结果顺序即相关度，不去重。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::SearchError;
use crate::llm::build_client;

pub const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

/// 单条搜索结果
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: Some(content.into()),
            snippet: None,
        }
    }

    /// content 优先，其次 snippet
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.snippet.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or("(No content available)")
    }

    /// snippet 优先（循环内合成上下文用短文本）
    pub fn summary(&self) -> &str {
        self.snippet
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.body())
    }
}

/// 搜索协作方
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError>;
}

/// 未配置搜索时使用：永远返回空结果
#[derive(Clone, Debug, Default)]
pub struct NoopSearch;

#[async_trait]
impl SearchProvider for NoopSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

pub struct HttpSearchClient {
    http_client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSearchClient {
    pub fn new(url: Option<&str>, api_key: Option<String>, timeout_secs: u64) -> Self {
        let http_client = build_client(
            Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .user_agent(concat!("bubble/", env!("CARGO_PKG_VERSION"))),
            "search",
        );
        Self {
            http_client,
            url: url.unwrap_or(DEFAULT_SEARCH_URL).to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let request = SearchRequest {
            api_key: self.api_key.as_deref(),
            query,
            max_results: limit,
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Request(format!("search API error {status}: {error_text}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        let mut results = body.results;
        results.truncate(limit);
        tracing::debug!(query, count = results.len(), "Search completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_body_fallbacks() {
        let full = SearchResult::new("T", "https://t", "full text");
        assert_eq!(full.body(), "full text");

        let snippet_only = SearchResult {
            title: "S".into(),
            url: "https://s".into(),
            content: Some(String::new()),
            snippet: Some("short".into()),
        };
        assert_eq!(snippet_only.body(), "short");
        assert_eq!(snippet_only.summary(), "short");

        let empty = SearchResult::default();
        assert_eq!(empty.body(), "(No content available)");
    }

    #[test]
    fn test_response_parsing_keeps_order() {
        let json = r#"{"answer":null,"results":[
            {"title":"B","url":"https://b","content":"2","score":0.9},
            {"title":"A","url":"https://a","content":"1","score":0.8}]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let titles: Vec<_> = parsed.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn test_request_omits_missing_key() {
        let body = serde_json::to_value(SearchRequest { api_key: None, query: "q", max_results: 15 }).unwrap();
        assert!(body.get("api_key").is_none());
        assert_eq!(body["max_results"], 15);
    }
}
