//! 对话历史
//!
//! 调用方传入的历史消息（user / ai），以及构建请求时去掉末尾未回复的用户消息。

use serde::{Deserialize, Serialize};

/// 消息发送方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// 单条历史消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub sender: Sender,
    pub text: String,
}

impl HistoryMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Ai,
            text: text.into(),
        }
    }
}

/// 去掉末尾悬挂的用户消息（当前 prompt 会作为新一轮单独发送）
pub fn without_dangling_user(history: &[HistoryMessage]) -> &[HistoryMessage] {
    match history.last() {
        Some(last) if last.sender == Sender::User => &history[..history.len() - 1],
        _ => history,
    }
}
