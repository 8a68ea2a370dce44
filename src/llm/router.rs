//! 后端路由
//!
//! 持有已配置的原生 / 兼容后端，按会话解析出的 Backend 打开流：
//! 原生后端经 RetryPolicy；兼容后端只打开一次，失败且配置了原生后端时，
//! 发出提示后改用原生兜底模型重新打开（同样经 RetryPolicy）。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{ChunkSink, LlmError};
use crate::llm::{friendly_model_name, Backend, OpenedStream, RetryPolicy, StreamProvider, StreamRequest};

#[derive(Clone, Default)]
pub struct ProviderRouter {
    native: Option<Arc<dyn StreamProvider>>,
    secondary: Option<Arc<dyn StreamProvider>>,
    retry: RetryPolicy,
}

impl ProviderRouter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            native: None,
            secondary: None,
            retry,
        }
    }

    pub fn with_native(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.native = Some(provider);
        self
    }

    pub fn with_secondary(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    pub fn has_native(&self) -> bool {
        self.native.is_some()
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn fallback_model(&self) -> &str {
        self.retry.recovery().fallback_model()
    }

    async fn open_native(
        &self,
        request: &StreamRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<OpenedStream, LlmError> {
        let provider = self
            .native
            .as_deref()
            .ok_or_else(|| LlmError::MissingCredentials("GEMINI_API_KEY not set".to_string()))?;
        self.retry.open(provider, request, sink, cancel).await
    }

    pub async fn open(
        &self,
        backend: Backend,
        request: &StreamRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<OpenedStream, LlmError> {
        if backend == Backend::Native {
            return self.open_native(request, sink, cancel).await;
        }

        let provider = self
            .secondary
            .as_deref()
            .ok_or_else(|| LlmError::MissingCredentials("OpenRouter API key not found".to_string()))?;
        let err = match self.retry.open(provider, request, sink, cancel).await {
            Ok(opened) => return Ok(opened),
            Err(e) => e,
        };

        let recoverable = !matches!(err, LlmError::Cancelled | LlmError::UnsupportedInput(_));
        if !recoverable || !self.has_native() {
            return Err(err);
        }

        let fallback = self.fallback_model().to_string();
        tracing::warn!(
            model = %request.model,
            fallback = %fallback,
            error = %err,
            "Secondary generation failed, falling back to native provider"
        );
        sink.emit(&format!(
            "\n*({} failed. Falling back to {}...)*\n",
            friendly_model_name(&request.model),
            friendly_model_name(&fallback)
        ));

        let mut native_request = request.clone();
        native_request.model = fallback;
        native_request.grounding = true;
        self.open_native(&native_request, sink, cancel).await
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("native", &self.has_native())
            .field("secondary", &self.has_secondary())
            .field("retry", &self.retry)
            .finish()
    }
}
