//! 片段转发与取消
//!
//! 逐个拉取片段：先检查取消，再同步调用 ChunkSink，再追加到会话缓冲；
//! 取消与提前停止都是正常结束（StreamEnd），不是错误。

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::{ChunkSink, GroundingSource, LlmError};
use crate::llm::{Backend, FragmentStream};

/// 单次后端调用的会话（调用结束即丢弃）
#[derive(Clone, Debug)]
pub struct ProviderSession {
    pub backend: Backend,
    /// 实际使用的模型（兜底后可能与请求不同）
    pub model: String,
    pub output: String,
    /// 按发现顺序追加，保留重复
    pub grounding: Vec<GroundingSource>,
}

impl ProviderSession {
    pub fn new(backend: Backend, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            output: String::new(),
            grounding: Vec::new(),
        }
    }
}

/// 流的结束方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// 后端正常结束
    Completed,
    /// 取消令牌触发
    Cancelled,
    /// stop_when 命中（如 Canvas 闭合标签），不再等待后端
    EarlyStop,
}

/// 消费整个流；stop_when 在每个文本片段追加后基于本次缓冲判断
pub async fn forward_stream(
    mut stream: FragmentStream,
    session: &mut ProviderSession,
    sink: &ChunkSink,
    cancel: &CancellationToken,
    stop_when: impl Fn(&str) -> bool,
) -> Result<StreamEnd, LlmError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            next = stream.next() => next,
        };

        let fragment = match next {
            Some(Ok(fragment)) => fragment,
            Some(Err(e)) => return Err(e),
            None => return Ok(StreamEnd::Completed),
        };

        if cancel.is_cancelled() {
            return Ok(StreamEnd::Cancelled);
        }

        session.grounding.extend(fragment.grounding);
        if fragment.text.is_empty() {
            continue;
        }
        sink.emit(&fragment.text);
        session.output.push_str(&fragment.text);

        if stop_when(&session.output) {
            tracing::debug!(model = %session.model, "Stopping stream early");
            return Ok(StreamEnd::EarlyStop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use futures_util::stream;

    use crate::llm::TextFragment;

    fn recording_sink() -> (ChunkSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let clone = seen.clone();
        let sink = ChunkSink::new(move |t| clone.lock().unwrap().push(t.to_string()));
        (sink, seen)
    }

    fn fragments(texts: &[&str]) -> FragmentStream {
        let items: Vec<Result<TextFragment, LlmError>> =
            texts.iter().map(|t| Ok(TextFragment::text(*t))).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let (sink, seen) = recording_sink();
        let mut session = ProviderSession::new(Backend::Native, "m");
        let end = forward_stream(fragments(&["a", "b", "c"]), &mut session, &sink, &CancellationToken::new(), |_| false)
            .await
            .unwrap();
        assert_eq!(end, StreamEnd::Completed);
        assert_eq!(session.output, "abc");
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_early_stop_skips_rest() {
        let (sink, seen) = recording_sink();
        let mut session = ProviderSession::new(Backend::Native, "m");
        let end = forward_stream(
            fragments(&["<X>", "body</X>", "ramble"]),
            &mut session,
            &sink,
            &CancellationToken::new(),
            |buf| buf.contains("</X>"),
        )
        .await
        .unwrap();
        assert_eq!(end, StreamEnd::EarlyStop);
        assert_eq!(session.output, "<X>body</X>");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let (sink, seen) = recording_sink();
        let cancel = CancellationToken::new();
        let first: FragmentStream = Box::pin(
            stream::iter(vec![Ok::<_, LlmError>(TextFragment::text("partial"))]).chain(stream::pending()),
        );
        let mut session = ProviderSession::new(Backend::Secondary, "m");
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let end = forward_stream(first, &mut session, &sink, &cancel, |_| false).await.unwrap();
        assert_eq!(end, StreamEnd::Cancelled);
        assert_eq!(session.output, "partial");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grounding_collected_without_text() {
        let (sink, seen) = recording_sink();
        let source = GroundingSource { uri: "https://x".into(), title: "X".into() };
        let items: Vec<Result<TextFragment, LlmError>> = vec![
            Ok(TextFragment { text: String::new(), grounding: vec![source.clone()] }),
            Ok(TextFragment { text: "t".into(), grounding: vec![source.clone()] }),
        ];
        let mut session = ProviderSession::new(Backend::Native, "m");
        forward_stream(Box::pin(stream::iter(items)), &mut session, &sink, &CancellationToken::new(), |_| false)
            .await
            .unwrap();
        assert_eq!(session.grounding, vec![source.clone(), source]);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let (sink, _) = recording_sink();
        let items = vec![Ok(TextFragment::text("a")), Err(LlmError::Network("reset".into()))];
        let mut session = ProviderSession::new(Backend::Native, "m");
        let result =
            forward_stream(Box::pin(stream::iter(items)), &mut session, &sink, &CancellationToken::new(), |_| false).await;
        assert!(result.is_err());
        assert_eq!(session.output, "a");
    }
}
