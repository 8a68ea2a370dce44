//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BUBBLE__*` 覆盖（双下划线表示嵌套，如 `BUBBLE__LLM__DEFAULT_MODEL=gemini-2.5-pro`）。
//! API Key 未写入配置时回退到 `GEMINI_API_KEY` / `OPENROUTER_API_KEY` / `SEARCH_API_KEY`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::recovery::FALLBACK_MODEL;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retry: RetrySection,
    pub search: SearchSection,
    pub agent: AgentSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 自定义人设指令文件（需包含 [MODEL_IDENTITY_BLOCK]），未设置时用内置人设
    pub persona_path: Option<PathBuf>,
}

/// [llm] 段：模型、各后端端点与凭据、超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub default_model: String,
    pub fallback_model: String,
    /// deep 模式首选模型
    pub deep_model: Option<String>,
    pub temperature: f32,
    pub gemini: GeminiSection,
    pub openrouter: OpenRouterSection,
    pub instant: InstantSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            default_model: FALLBACK_MODEL.to_string(),
            fallback_model: FALLBACK_MODEL.to_string(),
            deep_model: None,
            temperature: 0.7,
            gemini: GeminiSection::default(),
            openrouter: OpenRouterSection::default(),
            instant: InstantSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    pub fn gemini_api_key(&self) -> Option<String> {
        non_empty(self.gemini.api_key.clone()).or_else(|| env_key("GEMINI_API_KEY"))
    }

    pub fn openrouter_api_key(&self) -> Option<String> {
        non_empty(self.openrouter.api_key.clone()).or_else(|| env_key("OPENROUTER_API_KEY"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeminiSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenRouterSection {
    pub api_key: Option<String>,
    pub url: Option<String>,
    /// HTTP-Referer 头
    pub referer: Option<String>,
    /// X-Title 头
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstantSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 建立连接超时（秒）；流本身不设总超时
    pub connect: u64,
    /// instant 模式整次请求超时（秒）
    pub instant: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { connect: 30, instant: 60 }
    }
}

/// [retry] 段：原生后端限流退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub rate_limit_retries: u32,
    pub base_delay_ms: u64,
    pub offset_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            rate_limit_retries: 3,
            base_delay_ms: 2000,
            offset_ms: 1000,
        }
    }
}

impl RetrySection {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }
}

/// [search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub enabled: bool,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub limit: usize,
    pub timeout_secs: u64,
    /// 模型只发出一个 SEARCH 且尚无搜索上下文时，直接返回已生成文本
    pub defer_single_search: bool,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            api_key: None,
            limit: 15,
            timeout_secs: 15,
            defer_single_search: true,
        }
    }
}

impl SearchSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| env_key("SEARCH_API_KEY"))
    }
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: crate::core::MAX_ITERATIONS,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_key(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

/// 从 config 目录加载配置，环境变量 BUBBLE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BUBBLE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BUBBLE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
