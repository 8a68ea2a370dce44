//! 循环状态：Action 枚举、LoopState 与每轮的判别结果 Step
//!
//! LoopState 由循环控制器独占，按值传入每轮、按值返回，不存在跨分支的共享可变状态。

use serde::Serialize;

use crate::core::{GroundingSource, ResponseMetadata};

/// 循环最大轮数
pub const MAX_ITERATIONS: u32 = 6;

/// 循环动作（状态机的状态）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[default]
    Simple,
    DeepSearch,
    Image,
    Project,
    Canvas,
    Study,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Simple => "SIMPLE",
            Action::DeepSearch => "DEEP_SEARCH",
            Action::Image => "IMAGE",
            Action::Project => "PROJECT",
            Action::Canvas => "CANVAS",
            Action::Study => "STUDY",
        }
    }
}

/// 跨轮次的循环状态
#[derive(Clone, Debug, Default)]
pub struct LoopState {
    pub action: Action,
    /// 当前生效的 prompt（指令改写后可能与用户原始输入不同）
    pub prompt: String,
    /// 已开始的轮数，单调递增
    pub iteration: u32,
    /// 累计的、最终要持久化的回复文本
    pub response_text: String,
    pub grounding: Vec<GroundingSource>,
    /// 循环内搜索合成后的上下文（无结果时为说明文字）
    pub search_context: Option<String>,
}

impl LoopState {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// 开始新一轮；超过上限返回 false
    pub fn begin_iteration(&mut self, max_iterations: u32) -> bool {
        if self.iteration >= max_iterations {
            return false;
        }
        self.iteration += 1;
        true
    }

    pub fn redirect(&mut self, action: Action, prompt: impl Into<String>) {
        self.action = action;
        self.prompt = prompt.into();
    }

    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            grounding_metadata: self.grounding.clone(),
            action: (self.action != Action::Simple).then(|| self.action.as_str().to_string()),
        }
    }
}

/// 单轮结果
#[derive(Debug)]
pub enum Step {
    /// 进入下一轮
    Continue(LoopState),
    /// 结束循环，状态转为输出消息
    Terminate(LoopState),
    /// 丢弃已生成文本，交给 Canvas 协作方
    Handoff { prompt: String },
}
