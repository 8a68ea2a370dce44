//! SSE 事件流
//!
//! 帧解析交给 `eventsource-stream`；这里只取每个事件的 data 负载，
//! `[DONE]` 立即结束流，之后传输中剩余的事件一律丢弃。

use std::fmt::Display;

use futures_util::future;
use futures_util::stream::{Stream, StreamExt};

use eventsource_stream::Eventsource;

use crate::core::LlmError;

const DONE_MARKER: &str = "[DONE]";

/// 将字节流转换为 data 负载流；[DONE] 或传输结束时流结束
pub fn sse_data_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    bytes
        .eventsource()
        .map(|event| match event {
            Ok(event) => Ok(event.data),
            Err(e) => Err(LlmError::Network(format!("Stream error: {e}"))),
        })
        .take_while(|item| {
            let done = matches!(item, Ok(data) if data.trim() == DONE_MARKER);
            if done {
                tracing::debug!("SSE stream completed with [DONE]");
            }
            future::ready(!done)
        })
}
