//! 编排器：顶层入口
//!
//! 负责：根据配置创建后端（Gemini 原生 / OpenRouter 兼容 / Mock）、重试策略、搜索与 Canvas 协作方，
//! 并对每次请求：分派 instant 模式或主循环、把终止性错误映射为友好文案、把最终消息交给持久化协作方。
//! run 永不返回错误。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{run_agent_loop, AgentSession, CanvasAgent, CanvasArchitect, PERSONA_INSTRUCTION, STOPPED_BY_USER};
use crate::config::AppConfig;
use crate::core::{
    user_friendly_message, ExecutionResult, GenerationRequest, OutputMessage, RecoveryEngine, ThinkingMode,
    MAX_ITERATIONS,
};
use crate::llm::{
    Backend, FreeCompletionClient, GeminiProvider, MockLlmClient, ModelPolicy, OpenRouterProvider, ProviderRouter,
    RetryPolicy, StreamProvider,
};
use crate::memory::{MemoryProvider, MessageStore, NoopMemory, NoopStore};
use crate::search::{HttpSearchClient, SearchAugmenter};

/// 根据配置与环境变量选择原生后端（有 Gemini Key 用 Gemini，否则 Mock）
pub(crate) fn create_native_from_config(cfg: &AppConfig) -> Arc<dyn StreamProvider> {
    match cfg.llm.gemini_api_key() {
        Some(key) => {
            tracing::info!("Using Gemini native backend");
            Arc::new(GeminiProvider::new(
                key,
                cfg.llm.gemini.base_url.as_deref(),
                cfg.llm.timeouts.connect,
            ))
        }
        None => {
            tracing::warn!("No Gemini API key set, using Mock LLM");
            Arc::new(MockLlmClient::new(Backend::Native))
        }
    }
}

/// 有 OpenRouter Key 时创建兼容后端
pub(crate) fn create_secondary_from_config(cfg: &AppConfig) -> Option<Arc<dyn StreamProvider>> {
    let key = cfg.llm.openrouter_api_key()?;
    tracing::info!("OpenRouter secondary backend enabled");
    let provider = OpenRouterProvider::new(key, cfg.llm.openrouter.url.as_deref(), cfg.llm.timeouts.connect)
        .with_temperature(cfg.llm.temperature)
        .with_app_headers(cfg.llm.openrouter.referer.clone(), cfg.llm.openrouter.title.clone());
    Some(Arc::new(provider))
}

/// 人设：配置路径 > config/prompts/persona.txt > 内置
fn load_persona(path: Option<&Path>) -> String {
    let candidates = path
        .map(|p| p.to_path_buf())
        .into_iter()
        .chain(["config/prompts/persona.txt", "../config/prompts/persona.txt"].into_iter().map(PathBuf::from));
    for candidate in candidates {
        match std::fs::read_to_string(&candidate) {
            Ok(text) if !text.trim().is_empty() => {
                tracing::info!(path = %candidate.display(), "Loaded persona instruction");
                return text;
            }
            Ok(_) => {}
            Err(e) if path == Some(candidate.as_path()) => {
                tracing::warn!(path = %candidate.display(), error = %e, "Persona file unreadable, using built-in persona");
            }
            Err(_) => {}
        }
    }
    PERSONA_INSTRUCTION.to_string()
}

/// 顶层编排器；协作方均为 Send + Sync，可在多个并发会话间共享
pub struct Orchestrator {
    router: ProviderRouter,
    policy: ModelPolicy,
    search: SearchAugmenter,
    canvas: Arc<dyn CanvasAgent>,
    memory: Arc<dyn MemoryProvider>,
    store: Arc<dyn MessageStore>,
    instant: FreeCompletionClient,
    persona: String,
    max_iterations: u32,
    defer_single_search: bool,
}

impl Orchestrator {
    /// 以给定路由与模型策略创建；其余协作方为默认值（搜索关闭、空记忆、不保存、内置人设）
    pub fn new(router: ProviderRouter, policy: ModelPolicy) -> Self {
        let canvas = Arc::new(CanvasArchitect::new(router.clone(), policy.clone()));
        Self {
            router,
            policy,
            search: SearchAugmenter::disabled(),
            canvas,
            memory: Arc::new(NoopMemory),
            store: Arc::new(NoopStore),
            instant: FreeCompletionClient::new(None, 60),
            persona: PERSONA_INSTRUCTION.to_string(),
            max_iterations: MAX_ITERATIONS,
            defer_single_search: true,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let recovery = RecoveryEngine::new(cfg.llm.fallback_model.clone())
            .with_rate_limit_retries(cfg.retry.rate_limit_retries)
            .with_backoff(cfg.retry.base_delay(), cfg.retry.offset());

        let mut router = ProviderRouter::new(RetryPolicy::new(recovery)).with_native(create_native_from_config(cfg));
        if let Some(secondary) = create_secondary_from_config(cfg) {
            router = router.with_secondary(secondary);
        }

        let policy = ModelPolicy {
            default_model: cfg.llm.default_model.clone(),
            fallback_model: cfg.llm.fallback_model.clone(),
            deep_model: cfg.llm.deep_model.clone(),
            has_secondary_key: router.has_secondary(),
        };

        let search = if cfg.search.enabled {
            let client = HttpSearchClient::new(
                cfg.search.url.as_deref(),
                cfg.search.resolved_api_key(),
                cfg.search.timeout_secs,
            );
            SearchAugmenter::new(Arc::new(client)).with_limit(cfg.search.limit)
        } else {
            tracing::info!("Web search disabled");
            SearchAugmenter::disabled()
        };

        Self::new(router, policy)
            .with_search(search)
            .with_instant(FreeCompletionClient::new(
                cfg.llm.instant.url.as_deref(),
                cfg.llm.timeouts.instant,
            ))
            .with_persona(load_persona(cfg.app.persona_path.as_deref()))
            .with_max_iterations(cfg.agent.max_iterations)
            .with_defer_single_search(cfg.search.defer_single_search)
    }

    pub fn with_search(mut self, search: SearchAugmenter) -> Self {
        self.search = search;
        self
    }

    pub fn with_canvas(mut self, canvas: Arc<dyn CanvasAgent>) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_instant(mut self, instant: FreeCompletionClient) -> Self {
        self.instant = instant;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// 上限不超过 MAX_ITERATIONS
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.clamp(1, MAX_ITERATIONS);
        self
    }

    pub fn with_defer_single_search(mut self, defer: bool) -> Self {
        self.defer_single_search = defer;
        self
    }

    /// 执行一次生成；错误映射为 `⚠️ ...` 文本，取消返回部分文本或占位文本
    pub async fn run(&self, request: GenerationRequest) -> ExecutionResult {
        let span = tracing::info_span!("session", id = %Uuid::new_v4(), chat = %request.chat_id);
        async {
            let outcome = if request.mode == ThinkingMode::Instant {
                Ok(self.run_instant(&request).await)
            } else {
                run_agent_loop(AgentSession {
                    request: &request,
                    router: &self.router,
                    policy: &self.policy,
                    search: &self.search,
                    canvas: self.canvas.as_ref(),
                    memory: self.memory.as_ref(),
                    persona: &self.persona,
                    max_iterations: self.max_iterations,
                    defer_single_search: self.defer_single_search,
                })
                .await
            };

            let result = match outcome {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => {
                    tracing::info!("Generation cancelled");
                    ExecutionResult::single(OutputMessage::ai(&request.project_id, &request.chat_id, STOPPED_BY_USER))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Generation failed");
                    let text = format!("⚠️ {}", user_friendly_message(&e));
                    request.on_chunk.emit(&text);
                    ExecutionResult::single(OutputMessage::ai(&request.project_id, &request.chat_id, text))
                }
            };

            if let Err(e) = self.store.save(&result.messages).await {
                tracing::warn!(error = %e, "Failed to persist output messages");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_instant(&self, request: &GenerationRequest) -> ExecutionResult {
        tracing::info!("Instant mode, bypassing agent loop");
        let mut text = self.instant.complete(request).await;
        if text.is_empty() && request.cancel.is_cancelled() {
            text = STOPPED_BY_USER.to_string();
        }
        ExecutionResult::single(OutputMessage::ai(&request.project_id, &request.chat_id, text))
    }
}
