//! 请求与输出数据模型
//!
//! GenerationRequest 由调用方创建、对编排器只读；ExecutionResult 是编排器（以及 Canvas 协作方）的返回值。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::memory::HistoryMessage;

/// 流式片段回调：按到达顺序同步调用，每个片段恰好一次
#[derive(Clone)]
pub struct ChunkSink(Arc<dyn Fn(&str) + Send + Sync>);

impl ChunkSink {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// 丢弃所有片段（无 UI 的调用方）
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, text: &str) {
        (self.0)(text)
    }
}

impl fmt::Debug for ChunkSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChunkSink")
    }
}

impl Default for ChunkSink {
    fn default() -> Self {
        Self::noop()
    }
}

/// 附件：字节 + MIME + 显示名
#[derive(Clone, Debug)]
pub struct Attachment {
    pub data: Bytes,
    pub mime_type: String,
    pub name: String,
}

impl Attachment {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            name: name.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// text/* 或常见源码扩展名视为可内联的文本文件
    pub fn is_text(&self) -> bool {
        const TEXT_EXTENSIONS: [&str; 10] = ["js", "ts", "jsx", "tsx", "html", "css", "json", "md", "py", "lua"];
        if self.mime_type.starts_with("text/") {
            return true;
        }
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| TEXT_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
    }
}

/// 思考模式：instant 绕过主循环；think / deep 带思考预算
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    Instant,
    #[default]
    Fast,
    Think,
    Deep,
}

impl std::str::FromStr for ThinkingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instant" => Ok(ThinkingMode::Instant),
            "fast" => Ok(ThinkingMode::Fast),
            "think" => Ok(ThinkingMode::Think),
            "deep" => Ok(ThinkingMode::Deep),
            other => Err(format!("unknown thinking mode: {other}")),
        }
    }
}

/// 单次顶层调用的请求（调用方创建，编排器只读）
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub project_id: String,
    pub chat_id: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// 按时间顺序的对话历史；末尾可能是尚未回复的当前用户消息
    pub history: Vec<HistoryMessage>,
    /// 用户选择的模型；None / 空串表示默认模型
    pub model: Option<String>,
    pub mode: ThinkingMode,
    /// 显式思考预算（> 0 时覆盖模式默认值）
    pub thinking_budget: u32,
    /// 管理员可见搜索调试输出
    pub is_admin: bool,
    pub cancel: CancellationToken,
    pub on_chunk: ChunkSink,
}

impl GenerationRequest {
    pub fn new(project_id: impl Into<String>, chat_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            history: Vec::new(),
            model: None,
            mode: ThinkingMode::default(),
            thinking_budget: 0,
            is_admin: false,
            cancel: CancellationToken::new(),
            on_chunk: ChunkSink::noop(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_mode(mut self, mode: ThinkingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_chunk_sink(mut self, sink: ChunkSink) -> Self {
        self.on_chunk = sink;
        self
    }

    /// 复制请求并替换 prompt（Canvas 交接时使用）
    pub fn with_prompt_override(&self, prompt: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.prompt = prompt.into();
        next
    }
}

/// 引用来源（URI + 标题）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

/// 输出消息附带的元数据
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub grounding_metadata: Vec<GroundingSource>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub action: Option<String>,
}

impl ResponseMetadata {
    pub fn is_empty(&self) -> bool {
        self.grounding_metadata.is_empty() && self.action.is_none()
    }
}

/// 交给持久化协作方的输出消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    pub project_id: String,
    pub chat_id: String,
    pub sender: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<ResponseMetadata>,
}

impl OutputMessage {
    pub fn ai(project_id: &str, chat_id: &str, text: impl Into<String>) -> Self {
        Self {
            project_id: project_id.to_string(),
            chat_id: chat_id.to_string(),
            sender: "ai".to_string(),
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        if !metadata.is_empty() {
            self.metadata = Some(metadata);
        }
        self
    }
}

/// 编排器 / Canvas 协作方的返回值
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub messages: Vec<OutputMessage>,
}

impl ExecutionResult {
    pub fn single(message: OutputMessage) -> Self {
        Self { messages: vec![message] }
    }

    /// 第一条消息的文本（无消息时为空串）
    pub fn text(&self) -> &str {
        self.messages.first().map(|m| m.text.as_str()).unwrap_or("")
    }
}
