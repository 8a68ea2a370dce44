//! LLM 层：流式后端抽象与实现（Gemini 原生 / OpenRouter 兼容 / Mock）、重试策略、模型解析、instant 模式

pub mod gemini;
pub mod http;
pub mod instant;
pub mod mock;
pub mod openrouter;
pub mod retry;
pub mod router;
pub mod selection;
pub mod sse;
pub mod stream;
pub mod traits;

pub use gemini::GeminiProvider;
pub use http::build_client;
pub use instant::FreeCompletionClient;
pub use mock::{MockLlmClient, Script};
pub use openrouter::OpenRouterProvider;
pub use retry::{OpenedStream, RetryPolicy};
pub use router::ProviderRouter;
pub use selection::{friendly_model_name, is_native_model, resolve_model, ModelPolicy, ModelSelection};
pub use stream::{forward_stream, ProviderSession, StreamEnd};
pub use traits::{
    Backend, ChatMessage, ContentPart, FragmentStream, Role, StreamProvider, StreamRequest, TextFragment,
};
