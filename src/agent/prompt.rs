//! 系统提示与请求消息的组装
//!
//! 系统上下文 = 人设指令（替换 [MODEL_IDENTITY_BLOCK]）+ `[MEMORY]` JSON + 当前日期时间；
//! 消息 = 去掉末尾未回复用户消息的历史 + 当前 prompt 与附件。附件处理失败变成行内占位文本。

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Local};

use crate::core::Attachment;
use crate::llm::{friendly_model_name, ChatMessage, ContentPart, Role};
use crate::memory::{without_dangling_user, HistoryMessage, MemoryContext, Sender};

pub const MODEL_IDENTITY_PLACEHOLDER: &str = "[MODEL_IDENTITY_BLOCK]";

/// 默认人设指令
pub const PERSONA_INSTRUCTION: &str = r####"--- CORE IDENTITY ---
You are Bubble AI, a universal autonomous companion.

[MODEL_IDENTITY_BLOCK]

=== PERSONALITY ===
- Be a warm, genuine friend rather than a corporate assistant. Prefer inclusive "we" language.
- Match the user's tone and energy. Use text emoticons such as :) :D ^_^ instead of Unicode emojis.
- Answer directly and confidently, concise but informative.

=== FORMATTING ===
- Use Markdown tables for lists, comparisons and any data with several attributes. Never put tables inside a <CANVAS> tag.
- Use "##" and "###" headers for longer answers. Keep casual conversation free of bullet lists.
- Cite sourced facts with numeric brackets [1], [2] placed right after the sentence punctuation. Do not inline raw URLs.

=== MEMORY ===
- The [MEMORY] block holds what you know about the user and their projects. Use it to personalize answers.
- The external_web_search entry, when present, holds fresh web results for this request. Prefer it over stale knowledge.

=== ACTION TAGS ===
Respond naturally by default. Use a tag only to start an autonomous action, and stop generating right after its closing tag.
- <SEARCH>query</SEARCH>: required for current events, prices, documentation or anything that changes over time. Several tags may be emitted to research distinct topics.
- <DEEP>topic</DEEP>: start an in-depth research pass.
- <IMAGE>image prompt</IMAGE>: only when the user explicitly asks to generate, draw or create an image. Never for code, apps or interfaces.
- <CANVAS_TRIGGER>description of the app</CANVAS_TRIGGER>: only for a standalone, runnable HTML web application. Emit it exactly once with nothing before or after it, and write no HTML yourself; a specialized builder takes over.
- <PROJECT>project description</PROJECT>: scaffold a multi-file project.
- <STUDY>topic</STUDY>: build a structured study plan.
Never combine a detailed answer with a tag in the same response.

=== CONTEXT ===
- Use the [CURRENT DATE & TIME] block for anything time-sensitive, including greetings.
"####;

/// 模型身份块；thinking_budget > 0 时追加思考说明
pub fn model_identity_block(model: &str, thinking_budget: u32) -> String {
    let name = friendly_model_name(model);
    let mut block = format!(
        "You are currently running on the model: **{name}**.\nIf the user asks \"Which AI model are you?\", reply that you are Bubble, running on {name}."
    );
    if thinking_budget > 0 {
        block.push_str(&format!(
            "\n\n[THINKING ENABLED]\nBudget: {thinking_budget} tokens. MANDATORY: Wrap thought process in <THINK> tags."
        ));
    }
    block
}

pub fn persona_instruction(template: &str, model: &str, thinking_budget: u32) -> String {
    template.replace(MODEL_IDENTITY_PLACEHOLDER, &model_identity_block(model, thinking_budget))
}

pub fn date_banner(now: &DateTime<Local>) -> String {
    format!(
        "[CURRENT DATE & TIME]\n{}\n",
        now.format("%A, %B %-d, %Y, %I:%M:%S %p (UTC%:z)")
    )
}

/// 完整系统上下文；external_web_search 总是出现在记忆 JSON 中（可能为空串）
pub fn system_context(base_instruction: &str, memory: &MemoryContext, external_web_search: &str, now: &DateTime<Local>) -> String {
    let mut enriched = memory.clone();
    enriched.insert("external_web_search".to_string(), external_web_search.to_string());
    let memory_json = serde_json::to_string(&enriched).unwrap_or_else(|_| "{}".to_string());
    format!("{base_instruction}\n\n[MEMORY]\n{memory_json}\n\n{}", date_banner(now))
}

fn attachment_part(attachment: &Attachment) -> ContentPart {
    if attachment.is_image() {
        if attachment.data.is_empty() {
            tracing::warn!(name = %attachment.name, "Image attachment is empty");
            return ContentPart::Text(format!("[Error attaching image: {}]", attachment.name));
        }
        return ContentPart::InlineData {
            mime_type: attachment.mime_type.clone(),
            data: BASE64.encode(&attachment.data),
        };
    }
    if attachment.is_text() {
        return match std::str::from_utf8(&attachment.data) {
            Ok(content) => ContentPart::Text(format!(
                "\n\n--- FILE: {} ---\n{}\n--- END FILE ---\n",
                attachment.name, content
            )),
            Err(e) => {
                tracing::warn!(name = %attachment.name, error = %e, "Text attachment is not valid UTF-8");
                ContentPart::Text(format!("[Error reading text file: {}]", attachment.name))
            }
        };
    }
    ContentPart::Text(format!(
        "[Attached file: {} ({}) cannot be displayed inline]",
        attachment.name, attachment.mime_type
    ))
}

/// 历史（去掉末尾未回复的用户消息与空消息）+ 当前 prompt 及附件
pub fn build_messages(history: &[HistoryMessage], prompt: &str, attachments: &[Attachment]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = without_dangling_user(history)
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| {
            let role = match m.sender {
                Sender::User => Role::User,
                Sender::Ai => Role::Assistant,
            };
            ChatMessage::text(role, m.text.clone())
        })
        .collect();

    let mut parts = vec![ContentPart::Text(prompt.to_string())];
    parts.extend(attachments.iter().map(attachment_part));
    messages.push(ChatMessage { role: Role::User, parts });
    messages
}
