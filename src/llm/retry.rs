//! 打开流时的重试策略
//!
//! 只作用于原生后端、只在拿到第一个片段之前生效：404 换兜底模型立即重试一次，
//! 429 按 RecoveryEngine 的退避时长等待后重试；兼容后端只尝试一次。
//! 每次重试前通过 ChunkSink 发一条可见提示，等待期间可被取消。

use tokio_util::sync::CancellationToken;

use crate::core::{ChunkSink, LlmError, RecoveryAction, RecoveryEngine};
use crate::llm::{Backend, FragmentStream, StreamProvider, StreamRequest};

/// 成功打开的流及其实际使用的后端与模型
pub struct OpenedStream {
    pub stream: FragmentStream,
    pub backend: Backend,
    pub model: String,
}

impl std::fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    recovery: RecoveryEngine,
}

impl RetryPolicy {
    pub fn new(recovery: RecoveryEngine) -> Self {
        Self { recovery }
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    /// 打开流；模型兜底只影响本次调用，不写回调用方的请求
    pub async fn open(
        &self,
        provider: &dyn StreamProvider,
        request: &StreamRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<OpenedStream, LlmError> {
        let mut request = request.clone();
        let mut rate_limit_attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                opened = provider.open_stream(&request) => opened,
            };

            let err = match opened {
                Ok(stream) => {
                    return Ok(OpenedStream {
                        stream,
                        backend: provider.backend(),
                        model: request.model,
                    })
                }
                Err(e) => e,
            };

            if provider.backend() == Backend::Secondary {
                return Err(err);
            }

            match self.recovery.handle(&err, &request.model, rate_limit_attempt) {
                RecoveryAction::FallbackModel(fallback) => {
                    tracing::warn!(
                        model = %request.model,
                        fallback = %fallback,
                        error = %err,
                        "Model unavailable, falling back"
                    );
                    sink.emit(&format!(
                        "\n*(Model {} unavailable. Falling back to {}...)*\n",
                        request.model, fallback
                    ));
                    request.model = fallback;
                }
                RecoveryAction::Backoff(delay) => {
                    rate_limit_attempt += 1;
                    tracing::warn!(
                        model = %request.model,
                        attempt = rate_limit_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    let seconds = (delay.as_millis() + 500) / 1000;
                    sink.emit(&format!("\n*(Rate limit hit. Retrying in {seconds}s...)*\n"));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryAction::Propagate => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::llm::mock::{MockLlmClient, Script};
    use crate::llm::{ChatMessage, Role};

    fn request(model: &str) -> StreamRequest {
        StreamRequest {
            model: model.into(),
            system: String::new(),
            messages: vec![ChatMessage::text(Role::User, "hi")],
            thinking_budget: 0,
            grounding: false,
        }
    }

    fn rate_limited() -> Script {
        Script::Fail(LlmError::RateLimited { status: 429, message: "quota".into() })
    }

    fn not_found() -> Script {
        Script::Fail(LlmError::NotFound { status: 404, message: "no such model".into() })
    }

    fn recording_sink() -> (ChunkSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let clone = seen.clone();
        (ChunkSink::new(move |t| clone.lock().unwrap().push(t.to_string())), seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backoff_schedule() {
        let mock = MockLlmClient::new(Backend::Native)
            .with_script(rate_limited())
            .with_script(rate_limited())
            .with_script(rate_limited())
            .with_reply("ok");
        let (sink, seen) = recording_sink();

        let opened = RetryPolicy::default()
            .open(&mock, &request("gemini-2.5-pro"), &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(opened.model, "gemini-2.5-pro");

        let calls = mock.calls();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert_eq!(
            gaps,
            vec![Duration::from_millis(3000), Duration::from_millis(5000), Duration::from_millis(9000)]
        );

        let notices = seen.lock().unwrap().clone();
        assert_eq!(notices.len(), 3);
        assert!(notices[0].contains("Retrying in 3s"));
        assert!(notices[2].contains("Retrying in 9s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_notice_rounds_to_nearest_second() {
        let mock = MockLlmClient::new(Backend::Native)
            .with_script(rate_limited())
            .with_reply("ok");
        let (sink, seen) = recording_sink();
        let recovery = RecoveryEngine::new(crate::core::FALLBACK_MODEL)
            .with_backoff(Duration::from_millis(2000), Duration::from_millis(1500));

        RetryPolicy::new(recovery)
            .open(&mock, &request("m"), &sink, &CancellationToken::new())
            .await
            .unwrap();

        let calls = mock.calls();
        assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(3500));
        assert!(seen.lock().unwrap()[0].contains("Retrying in 4s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausted_propagates() {
        let mock = MockLlmClient::new(Backend::Native)
            .with_script(rate_limited())
            .with_script(rate_limited())
            .with_script(rate_limited())
            .with_script(rate_limited());
        let result = RetryPolicy::default()
            .open(&mock, &request("m"), &ChunkSink::noop(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_not_found_falls_back_once() {
        let mock = MockLlmClient::new(Backend::Native)
            .with_script(not_found())
            .with_reply("fine");
        let (sink, seen) = recording_sink();
        let opened = RetryPolicy::default()
            .open(&mock, &request("gemini-3-pro-preview"), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(opened.model, "gemini-2.5-flash");
        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].model, "gemini-2.5-flash");
        assert!(seen.lock().unwrap()[0].contains("Model gemini-3-pro-preview unavailable"));
    }

    #[tokio::test]
    async fn test_not_found_on_fallback_model_is_not_retried() {
        let mock = MockLlmClient::new(Backend::Native)
            .with_script(not_found())
            .with_script(not_found());
        let result = RetryPolicy::default()
            .open(&mock, &request("gemini-3-pro-preview"), &ChunkSink::noop(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LlmError::NotFound { .. })));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_secondary_backend_is_not_retried() {
        let mock = MockLlmClient::new(Backend::Secondary)
            .with_script(rate_limited())
            .with_reply("never");
        let result = RetryPolicy::default()
            .open(&mock, &request("deepseek/deepseek-chat"), &ChunkSink::noop(), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mock = MockLlmClient::new(Backend::Native)
            .with_script(rate_limited())
            .with_reply("late");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let result = RetryPolicy::default()
            .open(&mock, &request("m"), &ChunkSink::noop(), &cancel)
            .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let mock = MockLlmClient::new(Backend::Native);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RetryPolicy::default()
            .open(&mock, &request("m"), &ChunkSink::noop(), &cancel)
            .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(mock.call_count(), 0);
    }
}
