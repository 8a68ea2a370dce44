//! instant 模式：免费补全服务
//!
//! 不走主循环；把对话压平成 `User:` / `Assistant:` 文本一次性请求，
//! 再以小块模拟流式输出。服务失败变成一段行内错误文本，不向上抛错。

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{ChunkSink, GenerationRequest};
use crate::llm::http::build_client;
use crate::memory::{without_dangling_user, Sender};

pub const FREE_LLM_URL: &str = "https://apifreellm.com/api/chat";

const INSTANT_SYSTEM_PROMPT: &str = "You are Bubble, a helpful, friendly, and intelligent AI assistant.
You are currently in \"Instant Mode\" (Guest Mode).
- Be concise and direct.
- Use a warm, conversational tone.
- Do not claim features you do not have here, such as memory or file editing.";

const RATE_LIMIT_TEXT: &str = "Rate limit exceeded (1 request per 5s). Please wait a moment.";

#[derive(Debug, Serialize)]
struct FreeRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct FreeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// 当前轮的用户输入：prompt + 图片说明 + 内联文本文件
pub fn instant_prompt(request: &GenerationRequest) -> String {
    let mut image_notes = String::new();
    let mut file_blocks = String::new();
    for attachment in &request.attachments {
        if attachment.is_image() {
            image_notes.push_str(&format!("\n[User attached image: \"{}\"]", attachment.name));
        } else if attachment.is_text() {
            match std::str::from_utf8(&attachment.data) {
                Ok(content) => file_blocks.push_str(&format!(
                    "\n\n--- FILE: {} ---\n{}\n--- END FILE ---\n",
                    attachment.name, content
                )),
                Err(_) => file_blocks.push_str(&format!("\n[Error reading file: {}]", attachment.name)),
            }
        }
    }
    format!("{}{}{}", request.prompt, image_notes, file_blocks)
}

/// 完整请求负载：系统提示 + 压平的对话
pub fn build_payload(request: &GenerationRequest) -> String {
    let mut lines: Vec<String> = without_dangling_user(&request.history)
        .iter()
        .map(|m| match m.sender {
            Sender::User => format!("User: {}", m.text),
            Sender::Ai => format!("Assistant: {}", m.text),
        })
        .collect();
    lines.push(format!("User: {}", instant_prompt(request)));
    format!(
        "{}\n\n=== CONVERSATION HISTORY ===\n{}\n\nAssistant:",
        INSTANT_SYSTEM_PROMPT,
        lines.join("\n")
    )
}

fn error_text(message: &str) -> String {
    if message.contains("Rate limit") || message.to_lowercase().contains("wait") {
        RATE_LIMIT_TEXT.to_string()
    } else {
        format!("[Instant Mode Error] {message}")
    }
}

/// 免费补全服务客户端
#[derive(Clone, Debug)]
pub struct FreeCompletionClient {
    client: Client,
    url: String,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl FreeCompletionClient {
    pub fn new(url: Option<&str>, timeout_secs: u64) -> Self {
        let client = build_client(Client::builder().timeout(Duration::from_secs(timeout_secs)), "instant");
        Self {
            client,
            url: url.unwrap_or(FREE_LLM_URL).to_string(),
            chunk_size: 4,
            chunk_delay: Duration::from_millis(15),
        }
    }

    async fn request_text(&self, payload: &str) -> Result<String, String> {
        let response = self
            .client
            .post(&self.url)
            .json(&FreeRequest { message: payload })
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP Error: {}", status.as_u16()));
        }
        let body: FreeResponse = response.json().await.map_err(|e| e.to_string())?;
        if body.status == "success" {
            Ok(body.response)
        } else {
            Err(body.error.unwrap_or_else(|| "API returned error status".to_string()))
        }
    }

    /// 返回最终文本；请求阶段被取消时返回空串，模拟流式阶段被取消时返回已发出的部分
    pub async fn complete(&self, request: &GenerationRequest) -> String {
        let payload = build_payload(request);
        let result = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return String::new(),
            result = self.request_text(&payload) => result,
        };

        match result {
            Ok(text) => {
                simulate_stream(&text, &request.on_chunk, &request.cancel, self.chunk_size, self.chunk_delay).await
            }
            Err(e) => {
                tracing::error!(error = %e, "Free completion service failed");
                let text = error_text(&e);
                request.on_chunk.emit(&text);
                text
            }
        }
    }
}

/// 按字符切块发出，每块之间等待 delay；取消时停止并返回已发出的部分
pub async fn simulate_stream(
    text: &str,
    sink: &ChunkSink,
    cancel: &CancellationToken,
    chunk_size: usize,
    delay: Duration,
) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut emitted = String::with_capacity(text.len());
    for piece in chars.chunks(chunk_size.max(1)) {
        if cancel.is_cancelled() {
            break;
        }
        let chunk: String = piece.iter().collect();
        sink.emit(&chunk);
        emitted.push_str(&chunk);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    emitted
}
