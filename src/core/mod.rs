//! 核心层：请求与输出模型、错误与恢复、循环状态、会话监管、顶层编排器

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod request;
pub mod session_supervisor;
pub mod state;

pub use error::{user_friendly_message, AgentError, LlmError, ProviderErrorKind, RecoveryAction, SearchError};
pub use orchestrator::Orchestrator;
pub use recovery::{RecoveryEngine, FALLBACK_MODEL};
pub use request::{
    Attachment, ChunkSink, ExecutionResult, GenerationRequest, GroundingSource, OutputMessage, ResponseMetadata,
    ThinkingMode,
};
pub use session_supervisor::SessionSupervisor;
pub use state::{Action, LoopState, Step, MAX_ITERATIONS};
