//! 模型与后端解析（每个会话一次）
//!
//! 根据请求的模型、思考模式与可用凭据决定后端、最终模型和思考预算；
//! 每次被迫换模型都会产生一条给用户看的提示，由调用方经 ChunkSink 发出。

use crate::core::{GenerationRequest, ThinkingMode};
use crate::llm::Backend;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_DEEP_MODEL: &str = "gemini-3-pro-preview";
pub const THINK_BUDGET: u32 = 2048;
pub const DEEP_BUDGET: u32 = 8192;

/// 解析时依赖的配置与凭据状态
#[derive(Clone, Debug)]
pub struct ModelPolicy {
    pub default_model: String,
    pub fallback_model: String,
    /// deep 模式的首选模型；None 使用 DEFAULT_DEEP_MODEL
    pub deep_model: Option<String>,
    pub has_secondary_key: bool,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            fallback_model: DEFAULT_MODEL.to_string(),
            deep_model: None,
            has_secondary_key: false,
        }
    }
}

/// 解析结果
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSelection {
    pub backend: Backend,
    pub model: String,
    pub thinking_budget: u32,
    /// 原生后端或 perplexity 系列模型可做搜索增强
    pub supports_grounding: bool,
    pub notices: Vec<String>,
}

/// 空模型、gemini / veo 前缀、或包含 google 的模型走原生后端
pub fn is_native_model(model: &str) -> bool {
    if model.is_empty() {
        return true;
    }
    let lower = model.to_lowercase();
    lower.starts_with("gemini") || lower.starts_with("veo") || lower.contains("google")
}

/// `deepseek/deepseek-chat-v3` -> `Deepseek Chat V3`
pub fn friendly_model_name(model: &str) -> String {
    let raw = model.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(model);
    let spaced = raw.replace('-', " ");
    let mut out = String::with_capacity(spaced.len());
    let mut at_word_start = true;
    for c in spaced.chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if is_word && at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !is_word;
    }
    out
}

fn supports_thinking(model: &str) -> bool {
    model.contains("gemini-2.5") || model.contains("gemini-3")
}

pub fn resolve_model(request: &GenerationRequest, policy: &ModelPolicy) -> ModelSelection {
    let mut notices = Vec::new();
    let mut model = request
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&policy.default_model)
        .to_string();

    let mut thinking_budget = 0;
    match request.mode {
        ThinkingMode::Deep => {
            model = policy
                .deep_model
                .clone()
                .unwrap_or_else(|| DEFAULT_DEEP_MODEL.to_string());
            thinking_budget = DEEP_BUDGET;
        }
        ThinkingMode::Think => {
            model = policy.fallback_model.clone();
            thinking_budget = THINK_BUDGET;
        }
        ThinkingMode::Fast | ThinkingMode::Instant => {}
    }
    if request.thinking_budget > 0 {
        thinking_budget = request.thinking_budget;
    }

    let mut backend = if is_native_model(&model) {
        Backend::Native
    } else {
        Backend::Secondary
    };

    if backend == Backend::Secondary && !policy.has_secondary_key {
        notices.push("\n*(OpenRouter key missing, falling back to Gemini...)*\n".to_string());
        model = policy.fallback_model.clone();
        backend = Backend::Native;
    }

    if thinking_budget > 0 && backend == Backend::Native && !supports_thinking(&model) {
        notices.push(format!(
            "\n*(Switched to {} for Thinking mode compatibility)*\n",
            friendly_model_name(&policy.fallback_model)
        ));
        model = policy.fallback_model.clone();
    }

    let supports_grounding = backend == Backend::Native || model.contains("perplexity");

    tracing::info!(
        model = %model,
        backend = ?backend,
        thinking_budget,
        supports_grounding,
        "Model resolved"
    );

    ModelSelection {
        backend,
        model,
        thinking_budget,
        supports_grounding,
        notices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: Option<&str>, mode: ThinkingMode) -> GenerationRequest {
        let mut req = GenerationRequest::new("p", "c", "hi").with_mode(mode);
        req.model = model.map(String::from);
        req
    }

    fn with_key() -> ModelPolicy {
        ModelPolicy {
            has_secondary_key: true,
            ..ModelPolicy::default()
        }
    }

    #[test]
    fn test_empty_model_defaults_to_native() {
        let sel = resolve_model(&request(Some("  "), ThinkingMode::Fast), &ModelPolicy::default());
        assert_eq!(sel.model, DEFAULT_MODEL);
        assert_eq!(sel.backend, Backend::Native);
        assert!(sel.supports_grounding);
        assert!(sel.notices.is_empty());
    }

    #[test]
    fn test_secondary_without_key_falls_back() {
        let sel = resolve_model(
            &request(Some("deepseek/deepseek-chat"), ThinkingMode::Fast),
            &ModelPolicy::default(),
        );
        assert_eq!(sel.backend, Backend::Native);
        assert_eq!(sel.model, DEFAULT_MODEL);
        assert!(sel.notices[0].contains("OpenRouter key missing"));
    }

    #[test]
    fn test_secondary_with_key() {
        let sel = resolve_model(&request(Some("deepseek/deepseek-chat"), ThinkingMode::Fast), &with_key());
        assert_eq!(sel.backend, Backend::Secondary);
        assert!(!sel.supports_grounding);

        let sel = resolve_model(&request(Some("perplexity/sonar"), ThinkingMode::Fast), &with_key());
        assert!(sel.supports_grounding);
    }

    #[test]
    fn test_thinking_modes() {
        let deep = resolve_model(&request(Some("gemini-2.5-flash"), ThinkingMode::Deep), &ModelPolicy::default());
        assert_eq!(deep.model, DEFAULT_DEEP_MODEL);
        assert_eq!(deep.thinking_budget, DEEP_BUDGET);

        let policy = ModelPolicy {
            deep_model: Some("gemini-2.5-pro".into()),
            ..ModelPolicy::default()
        };
        let deep = resolve_model(&request(None, ThinkingMode::Deep), &policy);
        assert_eq!(deep.model, "gemini-2.5-pro");

        let think = resolve_model(&request(Some("anthropic/claude-3.5-sonnet"), ThinkingMode::Think), &with_key());
        assert_eq!(think.model, DEFAULT_MODEL);
        assert_eq!(think.thinking_budget, THINK_BUDGET);
        assert_eq!(think.backend, Backend::Native);
    }

    #[test]
    fn test_budget_on_incompatible_native_model_switches() {
        let mut req = request(Some("gemini-1.5-pro"), ThinkingMode::Fast);
        req.thinking_budget = 1024;
        let sel = resolve_model(&req, &ModelPolicy::default());
        assert_eq!(sel.model, DEFAULT_MODEL);
        assert_eq!(sel.thinking_budget, 1024);
        assert!(sel.notices[0].contains("Thinking mode compatibility"));
    }

    #[test]
    fn test_native_model_detection() {
        assert!(is_native_model(""));
        assert!(is_native_model("Gemini-2.5-pro"));
        assert!(is_native_model("veo-3"));
        assert!(is_native_model("google/gemma-3"));
        assert!(!is_native_model("openai/gpt-4o"));
    }

    #[test]
    fn test_friendly_model_name() {
        assert_eq!(friendly_model_name("gemini-2.5-flash"), "Gemini 2.5 Flash");
        assert_eq!(friendly_model_name("deepseek/deepseek-chat"), "Deepseek Chat");
        assert_eq!(friendly_model_name("gemini-3-pro-preview"), "Gemini 3 Pro Preview");
    }
}
