//! 兼容后端：OpenAI 兼容的 chat completion（OpenRouter 等）
//!
//! POST `{model, messages, stream: true, temperature}`，响应为 text/event-stream；
//! 每个 `data: ` 行取 `choices[0].delta.content`，`[DONE]` 正常结束，坏行记 warn 跳过。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::LlmError;
use crate::llm::http::build_client;
use crate::llm::sse::sse_data_stream;
use crate::llm::{Backend, ChatMessage, ContentPart, FragmentStream, Role, StreamProvider, StreamRequest, TextFragment};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// 可接收图片输入的模型名特征
const VISION_MARKERS: [&str; 4] = ["vision", "gemini", "claude", "gpt-4"];

pub fn supports_vision(model: &str) -> bool {
    let lower = model.to_lowercase();
    VISION_MARKERS.iter().any(|m| lower.contains(m))
}

/// 解析一条 data 负载；无 content 时返回 Ok(None)
pub fn parse_delta(data: &str) -> Result<Option<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(data)?;
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from))
}

fn to_openai_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    if let [ContentPart::Text(text)] = message.parts.as_slice() {
        return json!({ "role": role, "content": text });
    }
    let content: Vec<Value> = message
        .parts
        .iter()
        .map(|p| match p {
            ContentPart::Text(text) => json!({ "type": "text", "text": text }),
            ContentPart::InlineData { mime_type, data } => json!({
                "type": "image_url",
                "image_url": { "url": format!("data:{mime_type};base64,{data}") }
            }),
        })
        .collect();
    json!({ "role": role, "content": content })
}

/// 构建请求体：system 作为首条消息
pub fn build_request_body(request: &StreamRequest, temperature: f32) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": request.system })];
    messages.extend(request.messages.iter().map(to_openai_message));
    json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "temperature": temperature,
    })
}

/// 兼容后端客户端
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    url: String,
    temperature: f32,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, url: Option<&str>, timeout_secs: u64) -> Self {
        let client = build_client(Client::builder().connect_timeout(Duration::from_secs(timeout_secs)), "openrouter");
        Self {
            client,
            api_key: api_key.into(),
            url: url.unwrap_or(OPENROUTER_URL).to_string(),
            temperature: 0.7,
            referer: None,
            title: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// OpenRouter 的应用归属头（HTTP-Referer / X-Title）
    pub fn with_app_headers(mut self, referer: Option<String>, title: Option<String>) -> Self {
        self.referer = referer;
        self.title = title;
        self
    }
}

#[async_trait]
impl StreamProvider for OpenRouterProvider {
    fn backend(&self) -> Backend {
        Backend::Secondary
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<FragmentStream, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingCredentials("OpenRouter API key not found".to_string()));
        }
        if request.messages.iter().any(ChatMessage::has_inline_data) && !supports_vision(&request.model) {
            return Err(LlmError::UnsupportedInput(format!(
                "model {} does not accept image inputs",
                request.model
            )));
        }

        let mut builder = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream");
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder
            .json(&build_request_body(request, self.temperature))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &body));
        }

        let fragments = sse_data_stream(response.bytes_stream()).filter_map(|item| {
            future::ready(match item {
                Ok(data) => match parse_delta(&data) {
                    Ok(Some(text)) => Some(Ok(TextFragment::text(text))),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "Error parsing secondary stream chunk");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            })
        });
        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta() {
        let data = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_delta(data).unwrap().as_deref(), Some("Hi"));
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta(role_only).unwrap(), None);
        assert!(parse_delta("{not json").is_err());
    }

    #[test]
    fn test_request_body_is_wire_exact() {
        let request = StreamRequest {
            model: "deepseek/deepseek-chat".into(),
            system: "sys".into(),
            messages: vec![ChatMessage::text(Role::User, "hello")],
            thinking_budget: 0,
            grounding: false,
        };
        let body = build_request_body(&request, 0.7);
        let mut keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["messages", "model", "stream", "temperature"]);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_image_part_becomes_data_url() {
        let message = ChatMessage {
            role: Role::User,
            parts: vec![
                ContentPart::Text("what is this".into()),
                ContentPart::InlineData { mime_type: "image/jpeg".into(), data: "QUJD".into() },
            ],
        };
        let value = to_openai_message(&message);
        assert_eq!(value["content"][1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn test_supports_vision() {
        assert!(supports_vision("anthropic/claude-3.5-sonnet"));
        assert!(supports_vision("openai/gpt-4o"));
        assert!(!supports_vision("deepseek/deepseek-chat"));
    }

    #[tokio::test]
    async fn test_image_on_text_model_rejected_before_request() {
        let provider = OpenRouterProvider::new("key", Some("http://127.0.0.1:9"), 1);
        let request = StreamRequest {
            model: "deepseek/deepseek-chat".into(),
            system: String::new(),
            messages: vec![ChatMessage {
                role: Role::User,
                parts: vec![ContentPart::InlineData { mime_type: "image/png".into(), data: "AA".into() }],
            }],
            thinking_budget: 0,
            grounding: false,
        };
        let err = provider.open_stream(&request).await.err().unwrap();
        assert!(matches!(err, LlmError::UnsupportedInput(_)));
    }
}
