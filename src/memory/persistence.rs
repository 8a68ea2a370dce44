//! 持久化协作方：接收最终输出消息
//!
//! 存储格式不属于编排器；保存失败只记日志，不影响返回给调用方的结果。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::OutputMessage;

/// 消息存储协作方
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, messages: &[OutputMessage]) -> Result<(), String>;
}

/// 不保存
#[derive(Clone, Debug, Default)]
pub struct NoopStore;

#[async_trait]
impl MessageStore for NoopStore {
    async fn save(&self, _messages: &[OutputMessage]) -> Result<(), String> {
        Ok(())
    }
}

/// 内存存储（测试 / 单进程运行）
#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<OutputMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutputMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save(&self, messages: &[OutputMessage]) -> Result<(), String> {
        self.messages
            .lock()
            .map_err(|e| e.to_string())?
            .extend_from_slice(messages);
        Ok(())
    }
}
