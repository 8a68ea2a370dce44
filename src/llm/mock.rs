//! Mock 后端（用于测试与无 API Key 的本地运行）
//!
//! 按脚本依次返回片段或错误，并记录每次调用的模型、prompt 与时间；脚本用完后回显最后一条用户消息。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::core::LlmError;
use crate::llm::{Backend, FragmentStream, StreamProvider, StreamRequest, TextFragment};

/// 单次调用的脚本
#[derive(Clone, Debug)]
pub enum Script {
    /// 依次产出这些片段后正常结束
    Fragments(Vec<TextFragment>),
    /// open 阶段失败
    Fail(LlmError),
    /// 产出这些片段后永不结束（用于取消测试）
    Hang(Vec<TextFragment>),
}

impl Script {
    /// 整段文本按空白切成多个片段
    pub fn reply(text: &str) -> Self {
        Script::Fragments(
            text.split_inclusive(' ')
                .map(TextFragment::text)
                .collect(),
        )
    }
}

/// 一次 open_stream 调用的记录
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub model: String,
    pub system: String,
    /// 最后一条消息的文本部分
    pub prompt: String,
    pub thinking_budget: u32,
    pub at: tokio::time::Instant,
}

/// 按脚本回放的后端
#[derive(Debug)]
pub struct MockLlmClient {
    backend: Backend,
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, script: Script) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
        self
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.with_script(Script::reply(text))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(Backend::Native)
    }
}

#[async_trait]
impl StreamProvider for MockLlmClient {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<FragmentStream, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.joined_text())
            .unwrap_or_default();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                model: request.model.clone(),
                system: request.system.clone(),
                prompt: prompt.clone(),
                thinking_budget: request.thinking_budget,
                at: tokio::time::Instant::now(),
            });
        }

        let script = self.scripts.lock().ok().and_then(|mut s| s.pop_front());
        match script {
            Some(Script::Fragments(fragments)) => {
                Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok))))
            }
            Some(Script::Hang(fragments)) => Ok(Box::pin(
                stream::iter(fragments.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Some(Script::Fail(err)) => Err(err),
            None => {
                let echo = TextFragment::text(format!("Echo from Mock: {prompt}"));
                Ok(Box::pin(stream::iter(vec![Ok(echo)])))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, Role};

    fn request() -> StreamRequest {
        StreamRequest {
            model: "mock".into(),
            system: String::new(),
            messages: vec![ChatMessage::text(Role::User, "ping")],
            thinking_budget: 0,
            grounding: false,
        }
    }

    #[tokio::test]
    async fn test_scripts_then_echo() {
        let mock = MockLlmClient::default()
            .with_reply("hello there")
            .with_script(Script::Fail(LlmError::Network("down".into())));

        let first: Vec<_> = mock.open_stream(&request()).await.unwrap().collect().await;
        assert_eq!(first.len(), 2);
        assert!(mock.open_stream(&request()).await.is_err());

        let echo: Vec<_> = mock.open_stream(&request()).await.unwrap().collect().await;
        let text = echo.into_iter().map(|r| r.unwrap().text).collect::<String>();
        assert_eq!(text, "Echo from Mock: ping");
        assert_eq!(mock.call_count(), 3);
    }
}
