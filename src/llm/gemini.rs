//! 原生后端：Gemini streamGenerateContent（alt=sse）
//!
//! 片段中的文本与 groundingMetadata.groundingChunks 分开返回；无法解析的事件记 warn 后跳过。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{GroundingSource, LlmError};
use crate::llm::http::build_client;
use crate::llm::sse::sse_data_stream;
use crate::llm::{Backend, ChatMessage, ContentPart, FragmentStream, Role, StreamProvider, StreamRequest, TextFragment};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
    /// 思考摘要片段，不转发
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

/// 解析一条 SSE data 负载为片段（只看第一个 candidate）
pub fn parse_chunk(data: &str) -> Result<TextFragment, serde_json::Error> {
    let response: GenerateResponse = serde_json::from_str(data)?;
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(TextFragment::default());
    };

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let grounding = candidate
        .grounding_metadata
        .map(|g| {
            g.grounding_chunks
                .into_iter()
                .filter_map(|c| c.web)
                .map(|w| GroundingSource { uri: w.uri, title: w.title })
                .collect()
        })
        .unwrap_or_default();

    Ok(TextFragment { text, grounding })
}

fn to_gemini_parts(message: &ChatMessage) -> Vec<Value> {
    message
        .parts
        .iter()
        .map(|p| match p {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::InlineData { mime_type, data } => {
                json!({ "inlineData": { "mimeType": mime_type, "data": data } })
            }
        })
        .collect()
}

/// 构建 streamGenerateContent 请求体
pub fn build_request_body(request: &StreamRequest) -> Value {
    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": to_gemini_parts(m) })
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "systemInstruction": { "parts": [{ "text": request.system }] },
    });
    if request.grounding {
        body["tools"] = json!([{ "googleSearch": {} }]);
    }
    if request.thinking_budget > 0 {
        body["generationConfig"] = json!({
            "thinkingConfig": { "thinkingBudget": request.thinking_budget }
        });
    }
    body
}

/// 原生后端客户端
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, timeout_secs: u64) -> Self {
        let client = build_client(Client::builder().connect_timeout(Duration::from_secs(timeout_secs)), "gemini");
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, model)
    }
}

#[async_trait]
impl StreamProvider for GeminiProvider {
    fn backend(&self) -> Backend {
        Backend::Native
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<FragmentStream, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingCredentials("GEMINI_API_KEY not set".to_string()));
        }

        let response = self
            .client
            .post(self.stream_url(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &body));
        }

        let fragments = sse_data_stream(response.bytes_stream()).filter_map(|item| {
            future::ready(match item {
                Ok(data) => match parse_chunk(&data) {
                    Ok(fragment) if fragment.is_empty() => None,
                    Ok(fragment) => Some(Ok(fragment)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable native stream event");
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

    fn request(budget: u32, grounding: bool) -> StreamRequest {
        StreamRequest {
            model: "gemini-2.5-flash".into(),
            system: "be nice".into(),
            messages: vec![
                ChatMessage::text(Role::User, "hi"),
                ChatMessage::text(Role::Assistant, "hello"),
                ChatMessage {
                    role: Role::User,
                    parts: vec![
                        ContentPart::Text("look".into()),
                        ContentPart::InlineData { mime_type: "image/png".into(), data: "AAAA".into() },
                    ],
                },
            ],
            thinking_budget: budget,
            grounding,
        }
    }

    #[test]
    fn test_parse_chunk_text_and_grounding() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]},
            "groundingMetadata":{"groundingChunks":[
                {"web":{"uri":"https://a.example","title":"A"}},
                {"web":{"uri":"https://a.example","title":"A"}}]}}]}"#;
        let fragment = parse_chunk(data).unwrap();
        assert_eq!(fragment.text, "Hello");
        assert_eq!(fragment.grounding.len(), 2, "duplicates are preserved");
        assert_eq!(fragment.grounding[0].uri, "https://a.example");
    }

    #[test]
    fn test_parse_chunk_skips_thoughts() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"hmm","thought":true},{"text":"answer"}]}}]}"#;
        assert_eq!(parse_chunk(data).unwrap().text, "answer");
    }

    #[test]
    fn test_parse_chunk_without_candidates() {
        let fragment = parse_chunk(r#"{"usageMetadata":{}}"#).unwrap();
        assert!(fragment.is_empty());
        assert!(parse_chunk("not json").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let body = build_request_body(&request(2048, true));
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be nice");
        assert!(body["tools"][0].get("googleSearch").is_some());
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 2048);
    }

    #[test]
    fn test_request_body_without_thinking() {
        let body = build_request_body(&request(0, false));
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("tools").is_none());
    }
}
