//! Bubble - 指令驱动的流式智能体编排器
//!
//! 模块划分：
//! - **agent**: 指令解析、提示组装、主循环、Canvas 协作方
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求 / 输出模型、错误与恢复、循环状态、会话监管、编排器
//! - **llm**: 流式后端抽象与实现（Gemini 原生 / OpenRouter 兼容 / Mock）、重试策略、instant 模式
//! - **memory**: 对话历史、记忆与持久化协作方
//! - **observability**: 日志初始化
//! - **search**: 搜索协作方与搜索增强

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod search;

pub use crate::core::{ExecutionResult, GenerationRequest, Orchestrator};
