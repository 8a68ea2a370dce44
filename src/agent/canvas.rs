//! Canvas 协作方
//!
//! 主循环遇到 CANVAS 指令后丢弃已生成文本，以指令 payload 作为新 prompt 调用 CanvasAgent，
//! 其返回值原样作为本次调用的结果。CanvasArchitect 是默认实现：在会话后端上做一次生成，
//! 要求模型只输出 `<THINK>` 与 `<CANVAS>` 两个块。

use async_trait::async_trait;

use crate::agent::prompt::build_messages;
use crate::core::{Action, AgentError, ExecutionResult, GenerationRequest, LlmError, OutputMessage, ResponseMetadata};
use crate::llm::{forward_stream, resolve_model, ModelPolicy, ProviderRouter, ProviderSession, StreamEnd, StreamRequest};

pub const CANVAS_INSTRUCTION: &str = r#"You are the Canvas Architect, an expert creative coder.
Build a SINGLE-FILE HTML web application for the user's request.

=== OUTPUT FORMAT ===
Output exactly two blocks and nothing else:

<THINK>
Reasoning about layout, styling (Tailwind) and JavaScript logic. The user sees this as your chain of thought.
</THINK>

<CANVAS>
<!DOCTYPE html>
<html>
... complete, valid HTML ...
</html>
</CANVAS>

=== RULES ===
1. No text outside the two blocks.
2. No Markdown fences inside <CANVAS>; the tag is the container.
3. One file: all CSS in <style>, all JS in <script>.
4. Write the code yourself. Never write a prompt for another AI.
5. Always emit <THINK> first, then <CANVAS>.
"#;

/// Canvas 协作方接口
#[async_trait]
pub trait CanvasAgent: Send + Sync {
    /// request.prompt 已被替换为 CANVAS 指令的 payload
    async fn run(&self, request: GenerationRequest) -> Result<ExecutionResult, AgentError>;
}

/// 默认 Canvas 实现
pub struct CanvasArchitect {
    router: ProviderRouter,
    policy: ModelPolicy,
}

impl CanvasArchitect {
    pub fn new(router: ProviderRouter, policy: ModelPolicy) -> Self {
        Self { router, policy }
    }
}

#[async_trait]
impl CanvasAgent for CanvasArchitect {
    async fn run(&self, request: GenerationRequest) -> Result<ExecutionResult, AgentError> {
        let selection = resolve_model(&request, &self.policy);
        tracing::info!(model = %selection.model, "Canvas architect started");

        let stream_request = StreamRequest {
            model: selection.model.clone(),
            system: CANVAS_INSTRUCTION.to_string(),
            messages: build_messages(&request.history, &request.prompt, &request.attachments),
            thinking_budget: selection.thinking_budget,
            grounding: false,
        };

        let (mut session, end) = match self
            .router
            .open(selection.backend, &stream_request, &request.on_chunk, &request.cancel)
            .await
        {
            Ok(opened) => {
                let mut session = ProviderSession::new(opened.backend, opened.model);
                let end = forward_stream(opened.stream, &mut session, &request.on_chunk, &request.cancel, |_| false)
                    .await?;
                (session, end)
            }
            Err(LlmError::Cancelled) => (ProviderSession::new(selection.backend, selection.model), StreamEnd::Cancelled),
            Err(e) => return Err(AgentError::Canvas(e.to_string())),
        };

        let text = std::mem::take(&mut session.output);
        let message = if end == StreamEnd::Cancelled {
            let text = if text.is_empty() {
                "(Generation stopped by user)".to_string()
            } else {
                text
            };
            OutputMessage::ai(&request.project_id, &request.chat_id, text)
        } else {
            OutputMessage::ai(&request.project_id, &request.chat_id, text).with_metadata(ResponseMetadata {
                grounding_metadata: Vec::new(),
                action: Some(Action::Canvas.as_str().to_string()),
            })
        };
        Ok(ExecutionResult::single(message))
    }
}
