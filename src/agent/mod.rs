//! 编排层：指令解析、提示组装、主循环、Canvas 协作方

pub mod canvas;
pub mod directive;
pub mod loop_;
pub mod prompt;

pub use canvas::{CanvasAgent, CanvasArchitect, CANVAS_INSTRUCTION};
pub use directive::{closes_canvas, decide, parse_directives, Decision, Directive, DirectiveKind, ParsedOutput};
pub use loop_::{run_agent_loop, AgentSession, STOPPED_BY_USER};
pub use prompt::{build_messages, persona_instruction, system_context, PERSONA_INSTRUCTION};
