//! 编排器错误类型与恢复动作
//!
//! LlmError 由后端适配层按 HTTP 状态与结构化错误状态分类（NotFound / RateLimited / Other），
//! 重试策略只看分类，不匹配错误文案；AgentError 是循环向顶层传播的终止性错误。

use std::time::Duration;

use thiserror::Error;

/// 后端错误分类：重试策略据此决定换模型 / 退避 / 直接传播
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    NotFound,
    RateLimited,
    Other,
}

/// 后端调用错误（原生 / 兼容两种后端共用）
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// 404 / 400：模型不存在或请求无效
    #[error("Model not found or request invalid ({status}): {message}")]
    NotFound { status: u16, message: String },

    /// 429 / 配额耗尽
    #[error("Rate limited ({status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// 输入不被当前模型支持（如非视觉模型收到图片）
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// 调用在发出前或退避等待中被取消
    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    /// 由 HTTP 状态码与响应体构造错误。
    ///
    /// 响应体若是 `{"error": {"status": "..."}}` 结构（原生后端），其中的
    /// `NOT_FOUND` / `RESOURCE_EXHAUSTED` 优先于状态码。
    pub fn from_status(status: u16, body: &str) -> Self {
        let structured = serde_json::from_str::<serde_json::Value>(body).ok();
        let error_status = structured
            .as_ref()
            .and_then(|v| v.pointer("/error/status"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let message = structured
            .as_ref()
            .and_then(|v| v.pointer("/error/message"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| body.trim().to_string());

        match (status, error_status) {
            (_, "RESOURCE_EXHAUSTED") | (429, _) => LlmError::RateLimited { status, message },
            (_, "NOT_FOUND") | (404, _) | (400, _) => LlmError::NotFound { status, message },
            _ => LlmError::ApiError { status, message },
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            LlmError::NotFound { .. } => ProviderErrorKind::NotFound,
            LlmError::RateLimited { .. } => ProviderErrorKind::RateLimited,
            _ => ProviderErrorKind::Other,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Network(e.to_string())
    }
}

/// 搜索协作方错误
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(String),

    #[error("Search response invalid: {0}")]
    InvalidResponse(String),
}

/// 循环向顶层传播的错误；Cancelled 在顶层被识别，不会映射为错误消息
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Canvas agent failed: {0}")]
    Canvas(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled | AgentError::Llm(LlmError::Cancelled))
    }
}

/// 恢复引擎根据错误分类给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 换到兜底模型后立即重试（不退避）
    FallbackModel(String),
    /// 等待后以同一模型重试
    Backoff(Duration),
    /// 不再重试，错误交给上层
    Propagate,
}

/// 将终止性错误映射为面向用户的文案（不直接暴露原始错误文本）
pub fn user_friendly_message(err: &AgentError) -> String {
    match err {
        AgentError::Llm(LlmError::RateLimited { .. }) => {
            "The AI service is busy right now (rate limit reached). Please wait a moment and try again."
                .to_string()
        }
        AgentError::Llm(LlmError::NotFound { .. }) => {
            "The selected model is currently unavailable. Please pick a different model.".to_string()
        }
        AgentError::Llm(LlmError::MissingCredentials(_)) => {
            "No API key is configured for the selected model. Please add one in settings.".to_string()
        }
        AgentError::Llm(LlmError::UnsupportedInput(_)) => {
            "The selected model does not support image inputs. Please switch to a vision-capable model like Gemini Pro or Claude Sonnet."
                .to_string()
        }
        AgentError::Llm(LlmError::ApiError { status: 401 | 403, .. }) => {
            "The AI service rejected the request. Please check your API key.".to_string()
        }
        AgentError::Llm(LlmError::Network(_)) => {
            "Could not reach the AI service. Please check your connection and try again.".to_string()
        }
        AgentError::Canvas(_) => "The app builder could not finish this request. Please try again.".to_string(),
        _ => "Something went wrong while generating a response. Please try again.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(LlmError::from_status(404, "nope").kind(), ProviderErrorKind::NotFound);
        assert_eq!(LlmError::from_status(400, "bad").kind(), ProviderErrorKind::NotFound);
        assert_eq!(LlmError::from_status(429, "slow down").kind(), ProviderErrorKind::RateLimited);
        assert_eq!(LlmError::from_status(500, "boom").kind(), ProviderErrorKind::Other);
    }

    #[test]
    fn test_structured_status_wins() {
        let body = r#"{"error": {"code": 403, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        let err = LlmError::from_status(403, body);
        assert_eq!(err.kind(), ProviderErrorKind::RateLimited);
        assert!(err.to_string().contains("Quota exceeded"));

        let body = r#"{"error": {"message": "Requested entity was not found.", "status": "NOT_FOUND"}}"#;
        assert_eq!(LlmError::from_status(500, body).kind(), ProviderErrorKind::NotFound);
    }

    #[test]
    fn test_friendly_message_hides_raw_text() {
        let err = AgentError::Llm(LlmError::ApiError {
            status: 500,
            message: "internal stack trace xyz".to_string(),
        });
        let msg = user_friendly_message(&err);
        assert!(!msg.contains("xyz"));
    }

    #[test]
    fn test_cancelled_detection() {
        assert!(AgentError::Cancelled.is_cancelled());
        assert!(AgentError::Llm(LlmError::Cancelled).is_cancelled());
        assert!(!AgentError::Canvas("x".into()).is_cancelled());
    }
}
