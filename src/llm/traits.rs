//! 流式后端抽象
//!
//! 原生后端与 OpenAI 兼容后端都实现 StreamProvider::open_stream，返回惰性的 TextFragment 流；
//! 流不可恢复，重来只能重新调用。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::core::{GroundingSource, LlmError};

/// 后端选择（每个会话解析一次）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// 原生后端：结构化流式调用，带 grounding 元数据
    Native,
    /// 兼容后端：HTTP + SSE 的 chat completion
    Secondary,
}

/// 请求消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// 消息内容片段
#[derive(Clone, Debug, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// base64 编码的内联数据（图片）
    InlineData { mime_type: String, data: String },
}

/// 发往后端的一条消息
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn has_inline_data(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::InlineData { .. }))
    }

    /// 所有文本片段拼接
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::InlineData { .. } => None,
            })
            .collect()
    }
}

/// 单次后端调用的参数
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// 0 表示不开启思考
    pub thinking_budget: u32,
    /// 原生后端是否挂载搜索 grounding 工具
    pub grounding: bool,
}

/// 流中的一个片段：文本与 grounding 来源分开返回
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub grounding: Vec<GroundingSource>,
}

impl TextFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            grounding: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.grounding.is_empty()
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<TextFragment, LlmError>> + Send>>;

/// 流式后端能力接口
#[async_trait]
pub trait StreamProvider: Send + Sync {
    fn backend(&self) -> Backend;

    /// 发起调用；HTTP 层错误在这里按状态分类返回，流中途的错误作为流元素返回
    async fn open_stream(&self, request: &StreamRequest) -> Result<FragmentStream, LlmError>;
}
