//! 搜索增强
//!
//! 预搜索：在进入循环前判断 prompt 是否需要实时信息，是则搜索并把结果折叠成
//! `=== EXTERNAL WEB SEARCH RESULTS ===` 块，作为记忆中的 external_web_search 项；
//! 循环内搜索：对模型发出的第一条 SEARCH 查询执行搜索，生成合成 prompt 或“无结果”prompt。
//! 搜索协作方失败一律按“无结果”处理。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ChunkSink, GroundingSource};
use crate::search::{NoopSearch, SearchProvider, SearchResult};

/// 每次搜索请求的结果上限
pub const SEARCH_RESULT_LIMIT: usize = 15;

const LIVE_INFO_PATTERN: &str = r"(?i)\b(latest|current|currently|today|tonight|yesterday|tomorrow|this (week|month|year)|right now|recent|recently|news|headlines?|breaking|prices?|stocks?|weather|forecast|scores?|standings|release[sd]?|launch(ed)?|updates?|(19|20)\d{2}|search|look up|lookup)\b";

fn live_info_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LIVE_INFO_PATTERN).ok()).as_ref()
}

/// 是否需要外部搜索。follow_up 为 true 时（模型自己发出的 SEARCH）任何非空查询都算。
pub fn needs_live_info(text: &str, supports_grounding: bool, follow_up: bool) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    if follow_up {
        return true;
    }
    supports_grounding && live_info_regex().map(|re| re.is_match(text)).unwrap_or(false)
}

fn to_grounding(results: &[SearchResult]) -> Vec<GroundingSource> {
    results
        .iter()
        .map(|r| GroundingSource {
            uri: r.url.clone(),
            title: r.title.clone(),
        })
        .collect()
}

/// 预搜索结果块
pub fn format_results_block(query: &str, results: &[SearchResult]) -> String {
    let body: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "\n--- RESULT {} ---\nTitle: {}\nURL: {}\nContent: {}\n",
                i + 1,
                r.title,
                r.url,
                r.body()
            )
        })
        .collect();
    format!(
        "\n=== EXTERNAL WEB SEARCH RESULTS ===\nQuery: \"{}\"\n{}\n===================================\n",
        query,
        body.join("\n")
    )
}

fn admin_debug_block(query: &str, results: &[SearchResult]) -> String {
    let data = serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string());
    format!(
        "\n\n```json\n[ADMIN DEBUG: SEARCH]\nQuery: \"{}\"\nResults: {}\nData: {}\n```\n\n",
        query,
        results.len(),
        data
    )
}

/// 预搜索产物
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Preflight {
    /// 已经发给 sink、需要追加到回复文本的内容（回显标签 + 可选调试块）
    pub emitted: String,
    /// external_web_search 记忆项
    pub context: String,
    pub grounding: Vec<GroundingSource>,
}

/// 循环内搜索产物
#[derive(Clone, Debug, PartialEq)]
pub struct FollowUp {
    /// 下一轮的 prompt
    pub prompt: String,
    /// 合成上下文（无结果时为说明文字）
    pub context: String,
    pub grounding: Vec<GroundingSource>,
}

pub struct SearchAugmenter {
    provider: Arc<dyn SearchProvider>,
    limit: usize,
    /// 关闭时跳过预搜索，循环内搜索直接按无结果处理
    enabled: bool,
}

impl SearchAugmenter {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider,
            limit: SEARCH_RESULT_LIMIT,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            provider: Arc::new(NoopSearch),
            limit: SEARCH_RESULT_LIMIT,
            enabled: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// 执行搜索；协作方错误记 warn 后视为无结果
    async fn run(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<SearchResult>, AgentError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.provider.search(query, self.limit) => result,
        };
        match result {
            Ok(results) => {
                tracing::info!(query, count = results.len(), "Web search finished");
                Ok(results)
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "Web search failed, continuing without results");
                Ok(Vec::new())
            }
        }
    }

    /// 进入循环前的搜索；不需要实时信息时返回 None
    pub async fn preflight(
        &self,
        prompt: &str,
        supports_grounding: bool,
        is_admin: bool,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<Option<Preflight>, AgentError> {
        if !self.enabled || !needs_live_info(prompt, supports_grounding, false) {
            return Ok(None);
        }

        let mut emitted = format!("<SEARCH>{prompt}</SEARCH>");
        sink.emit(&emitted);

        let results = self.run(prompt, cancel).await?;

        if is_admin {
            let debug = admin_debug_block(prompt, &results);
            sink.emit(&debug);
            emitted.push_str(&debug);
        }

        let preflight = if results.is_empty() {
            Preflight {
                emitted,
                context: format!(
                    "[System: Search executed for \"{prompt}\" but returned no results. Rely on internal knowledge.]"
                ),
                grounding: Vec::new(),
            }
        } else {
            Preflight {
                emitted,
                context: format_results_block(prompt, &results),
                grounding: to_grounding(&results),
            }
        };
        Ok(Some(preflight))
    }

    /// 循环内对模型发出的查询执行搜索
    pub async fn follow_up(
        &self,
        original_prompt: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<FollowUp, AgentError> {
        let results = self.run(query, cancel).await?;

        if results.is_empty() {
            return Ok(FollowUp {
                prompt: format!(
                    "USER ORIGINALLY ASKED: {original_prompt}\n\nI attempted to search for: \"{query}\" but found no results.\n\nINSTRUCTIONS: Continue answering the user's request using your internal knowledge. Do NOT repeat the <SEARCH> tags."
                ),
                context: format!(
                    "[System: Search executed for \"{query}\" but returned no results. Continue with internal knowledge.]"
                ),
                grounding: Vec::new(),
            });
        }

        let context: String = results
            .iter()
            .map(|r| format!("{}: {}\n", r.title, r.summary()))
            .collect();
        Ok(FollowUp {
            prompt: format!(
                "USER ORIGINALLY ASKED: {original_prompt}\n\nI have performed the following searches based on my previous thought process:\n- {query}\n\nSEARCH CONTEXT:\n{context}\n\nINSTRUCTIONS: Synthesize a comprehensive answer to the user's original query using this search data. Cite sources using [1], [2] format. Do NOT repeat the <SEARCH> tags."
            ),
            grounding: to_grounding(&results),
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::core::SearchError;

    struct FixedSearch {
        results: Vec<SearchResult>,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SearchResult>, SearchError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self.results.clone())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl SearchProvider for FailingSearch {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>, SearchError> {
            Err(SearchError::Request("connection refused".into()))
        }
    }

    fn fixed(results: Vec<SearchResult>) -> Arc<FixedSearch> {
        Arc::new(FixedSearch { results, queries: Mutex::new(Vec::new()) })
    }

    #[test]
    fn test_needs_live_info() {
        assert!(needs_live_info("What's the latest news on Mars?", true, false));
        assert!(needs_live_info("bitcoin price", true, false));
        assert!(needs_live_info("who won the 2024 final", true, false));
        assert!(!needs_live_info("latest news", false, false));
        assert!(!needs_live_info("explain borrow checking", true, false));
        assert!(needs_live_info("explain borrow checking", false, true));
        assert!(!needs_live_info("   ", true, true));
    }

    #[tokio::test]
    async fn test_preflight_builds_context_and_grounding() {
        let provider = fixed(vec![
            SearchResult::new("A", "https://a", "alpha"),
            SearchResult::new("A", "https://a", "alpha again"),
        ]);
        let augmenter = SearchAugmenter::new(provider.clone());
        let pre = augmenter
            .preflight("latest rust release", true, false, &ChunkSink::noop(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pre.emitted, "<SEARCH>latest rust release</SEARCH>");
        assert!(pre.context.contains("=== EXTERNAL WEB SEARCH RESULTS ==="));
        assert!(pre.context.contains("--- RESULT 2 ---"));
        assert_eq!(pre.grounding.len(), 2, "no dedup");
        assert_eq!(provider.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preflight_skipped_without_cue() {
        let provider = fixed(vec![]);
        let augmenter = SearchAugmenter::new(provider.clone());
        let pre = augmenter
            .preflight("write a haiku", true, false, &ChunkSink::noop(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(pre.is_none());
        assert!(provider.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preflight_admin_debug() {
        let augmenter = SearchAugmenter::new(fixed(vec![SearchResult::new("A", "https://a", "x")]));
        let pre = augmenter
            .preflight("news today", true, true, &ChunkSink::noop(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(pre.emitted.contains("[ADMIN DEBUG: SEARCH]"));
        assert!(pre.emitted.contains("Results: 1"));
    }

    #[tokio::test]
    async fn test_failure_degrades_to_no_results() {
        let augmenter = SearchAugmenter::new(Arc::new(FailingSearch));
        let follow = augmenter
            .follow_up("what happened?", "mars news", &CancellationToken::new())
            .await
            .unwrap();
        assert!(follow.prompt.contains("found no results"));
        assert!(follow.context.contains("returned no results"));
        assert!(follow.grounding.is_empty());

        let pre = augmenter
            .preflight("weather today", true, false, &ChunkSink::noop(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(pre.context.contains("returned no results"));
    }

    #[tokio::test]
    async fn test_follow_up_synthesis_prompt() {
        let augmenter = SearchAugmenter::new(fixed(vec![SearchResult::new("Rust 1.80", "https://r", "released")]));
        let follow = augmenter
            .follow_up("what's new in rust", "rust 1.80", &CancellationToken::new())
            .await
            .unwrap();
        assert!(follow.prompt.starts_with("USER ORIGINALLY ASKED: what's new in rust"));
        assert!(follow.prompt.contains("Rust 1.80: released"));
        assert!(follow.prompt.contains("[1], [2]"));
        assert_eq!(follow.grounding[0].uri, "https://r");
    }

    #[tokio::test]
    async fn test_disabled_augmenter() {
        let augmenter = SearchAugmenter::disabled();
        let pre = augmenter
            .preflight("latest news", true, false, &ChunkSink::noop(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(pre.is_none());
        let follow = augmenter.follow_up("q", "news", &CancellationToken::new()).await.unwrap();
        assert!(follow.prompt.contains("found no results"));
    }

    #[tokio::test]
    async fn test_cancelled_search() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let augmenter = SearchAugmenter::new(fixed(vec![]));
        let result = augmenter.follow_up("q", "q", &cancel).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
