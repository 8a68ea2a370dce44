//! 指令驱动的主循环
//!
//! 每轮：组装系统上下文与消息 -> 打开流并转发片段（遇 Canvas 闭合标签提前停止）
//! -> 只解析本轮输出中的指令 -> 按优先级决定 Continue / Terminate / Handoff。
//! LoopState 按值在轮次之间传递；取消在每轮开始、打开流、转发片段、搜索、Canvas 交接时检查，
//! 取消后不再发起远程调用，以已生成的部分文本结束。

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::agent::canvas::CanvasAgent;
use crate::agent::directive::{closes_canvas, decide, parse_directives, Decision};
use crate::agent::prompt::{build_messages, persona_instruction, system_context};
use crate::core::{Action, AgentError, ExecutionResult, GenerationRequest, LlmError, LoopState, OutputMessage, Step};
use crate::llm::{
    forward_stream, resolve_model, Backend, ModelPolicy, ModelSelection, ProviderRouter, ProviderSession, StreamEnd,
    StreamRequest,
};
use crate::memory::{MemoryContext, MemoryProvider, MEMORY_LAYERS};
use crate::search::{needs_live_info, SearchAugmenter};

/// 取消且没有任何输出时的占位文本
pub const STOPPED_BY_USER: &str = "(Generation stopped by user)";

/// 单次循环的依赖与参数
pub struct AgentSession<'a> {
    pub request: &'a GenerationRequest,
    pub router: &'a ProviderRouter,
    pub policy: &'a ModelPolicy,
    pub search: &'a SearchAugmenter,
    pub canvas: &'a dyn CanvasAgent,
    pub memory: &'a dyn MemoryProvider,
    /// 含 [MODEL_IDENTITY_BLOCK] 占位符的人设指令
    pub persona: &'a str,
    pub max_iterations: u32,
    /// 单个 SEARCH 且尚无搜索上下文时直接结束
    pub defer_single_search: bool,
}

/// 进入循环后不再变化的会话上下文
struct TurnContext<'a> {
    session: &'a AgentSession<'a>,
    selection: ModelSelection,
    base_instruction: String,
    memory: MemoryContext,
    /// 预搜索结果块（external_web_search）
    external_search: String,
}

impl TurnContext<'_> {
    fn cancel(&self) -> &CancellationToken {
        &self.session.request.cancel
    }

    async fn run_iteration(&self, mut state: LoopState) -> Result<Step, AgentError> {
        let request = self.session.request;
        let sink = &request.on_chunk;

        let stream_request = StreamRequest {
            model: self.selection.model.clone(),
            system: system_context(&self.base_instruction, &self.memory, &self.external_search, &Local::now()),
            messages: build_messages(&request.history, &state.prompt, &request.attachments),
            thinking_budget: self.selection.thinking_budget,
            grounding: self.selection.backend == Backend::Native,
        };

        let opened = match self
            .session
            .router
            .open(self.selection.backend, &stream_request, sink, self.cancel())
            .await
        {
            Ok(opened) => opened,
            Err(LlmError::Cancelled) => return Ok(Step::Terminate(state)),
            Err(e) => return Err(e.into()),
        };

        let mut provider_session = ProviderSession::new(opened.backend, opened.model);
        let end = forward_stream(opened.stream, &mut provider_session, sink, self.cancel(), closes_canvas).await?;

        state.response_text.push_str(&provider_session.output);
        state.grounding.extend(provider_session.grounding);
        if end == StreamEnd::Cancelled {
            return Ok(Step::Terminate(state));
        }

        let parsed = parse_directives(&provider_session.output);
        let decision = decide(&parsed, state.search_context.is_some(), self.session.defer_single_search);
        tracing::debug!(
            iteration = state.iteration,
            model = %provider_session.model,
            directives = parsed.directives.len(),
            decision = ?decision,
            "Iteration finished"
        );

        match decision {
            Decision::Redirect { action, prompt } => {
                state.redirect(action, prompt);
                Ok(Step::Continue(state))
            }
            Decision::Search { query } if needs_live_info(&query, self.selection.supports_grounding, true) => {
                let follow = match self.session.search.follow_up(&request.prompt, &query, self.cancel()).await {
                    Ok(follow) => follow,
                    Err(e) if e.is_cancelled() => return Ok(Step::Terminate(state)),
                    Err(e) => return Err(e),
                };
                state.redirect(Action::Simple, follow.prompt);
                state.search_context = Some(follow.context);
                state.grounding.extend(follow.grounding);
                Ok(Step::Continue(state))
            }
            Decision::Search { .. } | Decision::StopAtSearch => Ok(Step::Terminate(state)),
            Decision::Canvas { prompt } => Ok(Step::Handoff { prompt }),
            Decision::Done => {
                if state.response_text.trim().is_empty() {
                    if let Some(context) = &state.search_context {
                        sink.emit(context);
                        state.response_text = context.clone();
                    }
                }
                Ok(Step::Terminate(state))
            }
        }
    }
}

fn finalize(request: &GenerationRequest, state: LoopState) -> ExecutionResult {
    let message = if request.cancel.is_cancelled() {
        let text = if state.response_text.is_empty() {
            STOPPED_BY_USER.to_string()
        } else {
            state.response_text
        };
        OutputMessage::ai(&request.project_id, &request.chat_id, text)
    } else {
        let metadata = state.metadata();
        OutputMessage::ai(&request.project_id, &request.chat_id, state.response_text).with_metadata(metadata)
    };
    ExecutionResult::single(message)
}

fn stopped_by_user(request: &GenerationRequest) -> ExecutionResult {
    ExecutionResult::single(OutputMessage::ai(&request.project_id, &request.chat_id, STOPPED_BY_USER))
}

/// 交给 Canvas 协作方；取消时立即结束，不等待协作方返回
async fn handoff(session: &AgentSession<'_>, prompt: String) -> Result<ExecutionResult, AgentError> {
    let request = session.request;
    let cancel = &request.cancel;
    if cancel.is_cancelled() {
        return Ok(stopped_by_user(request));
    }

    tracing::info!(prompt = %prompt, "Handing off to canvas agent");
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!("Generation cancelled during canvas handoff");
            return Ok(stopped_by_user(request));
        }
        result = session.canvas.run(request.with_prompt_override(prompt)) => result,
    };

    if !cancel.is_cancelled() {
        return result;
    }
    match result {
        Ok(result) if !result.text().is_empty() => Ok(result),
        Ok(_) => Ok(stopped_by_user(request)),
        Err(e) => {
            tracing::info!(error = %e, "Canvas agent stopped after cancellation");
            Ok(stopped_by_user(request))
        }
    }
}

async fn load_memory(memory: &dyn MemoryProvider, cancel: &CancellationToken) -> MemoryContext {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return MemoryContext::new(),
        result = memory.get_context(&MEMORY_LAYERS) => result,
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Memory context unavailable, continuing without it");
        MemoryContext::new()
    })
}

/// 运行主循环直到结束、交接或达到轮数上限
pub async fn run_agent_loop(session: AgentSession<'_>) -> Result<ExecutionResult, AgentError> {
    let request = session.request;
    let sink = &request.on_chunk;
    let cancel = &request.cancel;

    let selection = resolve_model(request, session.policy);
    for notice in &selection.notices {
        sink.emit(notice);
    }

    let mut state = LoopState::new(request.prompt.clone());
    if cancel.is_cancelled() {
        return Ok(finalize(request, state));
    }

    let mut external_search = String::new();
    match session
        .search
        .preflight(&request.prompt, selection.supports_grounding, request.is_admin, sink, cancel)
        .await
    {
        Ok(Some(preflight)) => {
            state.response_text.push_str(&preflight.emitted);
            state.grounding.extend(preflight.grounding);
            external_search = preflight.context;
        }
        Ok(None) => {}
        Err(e) if e.is_cancelled() => {
            // 回显标签已发出，取消时保留
            state.response_text = format!("<SEARCH>{}</SEARCH>", request.prompt);
            return Ok(finalize(request, state));
        }
        Err(e) => return Err(e),
    }

    let memory = load_memory(session.memory, cancel).await;
    let base_instruction = persona_instruction(session.persona, &selection.model, selection.thinking_budget);
    let context = TurnContext {
        session: &session,
        selection,
        base_instruction,
        memory,
        external_search,
    };

    loop {
        if cancel.is_cancelled() {
            tracing::info!(iteration = state.iteration, "Generation cancelled");
            break;
        }
        if !state.begin_iteration(session.max_iterations) {
            tracing::info!(max = session.max_iterations, "Iteration bound reached");
            break;
        }

        match context.run_iteration(state).await? {
            Step::Continue(next) => state = next,
            Step::Terminate(done) => return Ok(finalize(request, done)),
            Step::Handoff { prompt } => return handoff(&session, prompt).await,
        }
    }

    Ok(finalize(request, state))
}
