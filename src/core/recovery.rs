//! 错误恢复引擎
//!
//! 根据 LlmError 的分类返回 RecoveryAction，供重试策略决定是换兜底模型、指数退避还是直接传播。

use std::time::Duration;

use crate::core::{LlmError, ProviderErrorKind, RecoveryAction};

/// 默认兜底模型（原生后端）
pub const FALLBACK_MODEL: &str = "gemini-2.5-flash";

/// 语义化错误恢复：将分类后的错误映射为可执行动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    fallback_model: String,
    /// 限流时最多额外重试次数
    max_rate_limit_retries: u32,
    base_delay: Duration,
    fixed_offset: Duration,
}

impl RecoveryEngine {
    pub fn new(fallback_model: impl Into<String>) -> Self {
        Self {
            fallback_model: fallback_model.into(),
            max_rate_limit_retries: 3,
            base_delay: Duration::from_millis(2000),
            fixed_offset: Duration::from_millis(1000),
        }
    }

    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, fixed_offset: Duration) -> Self {
        self.base_delay = base_delay;
        self.fixed_offset = fixed_offset;
        self
    }

    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    /// 第 attempt 次限流后的等待时长：2^attempt × base + offset
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt) + self.fixed_offset
    }

    /// current_model：本次失败时使用的模型；rate_limit_attempt：已发生的限流重试次数
    pub fn handle(&self, err: &LlmError, current_model: &str, rate_limit_attempt: u32) -> RecoveryAction {
        match err.kind() {
            ProviderErrorKind::NotFound if current_model != self.fallback_model => {
                RecoveryAction::FallbackModel(self.fallback_model.clone())
            }
            ProviderErrorKind::RateLimited if rate_limit_attempt < self.max_rate_limit_retries => {
                RecoveryAction::Backoff(self.backoff_delay(rate_limit_attempt))
            }
            _ => RecoveryAction::Propagate,
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(FALLBACK_MODEL)
    }
}
