//! Bubble - 指令驱动的流式智能体编排器
//!
//! 入口：初始化日志、加载配置、创建编排器，对一条 prompt（命令行参数或 stdin）执行一次生成，
//! 片段到达即写 stdout；Ctrl+C 取消当前生成并输出已生成部分。
//!
//! 用法：`bubble [--config FILE] [--model MODEL] [--mode instant|fast|think|deep] [PROMPT...]`

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use bubble::config::{load_config, AppConfig};
use bubble::core::{ChunkSink, GenerationRequest, Orchestrator, SessionSupervisor, ThinkingMode};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bubble")]
#[command(about = "Directive-driven streaming agent orchestrator")]
#[command(version)]
struct Cli {
    /// Config file (defaults to config/default.toml)
    #[arg(short, long, env = "BUBBLE_CONFIG")]
    config: Option<PathBuf>,

    /// Model override, e.g. gemini-2.5-pro or openai/gpt-4o
    #[arg(short, long)]
    model: Option<String>,

    /// Thinking mode: instant, fast, think or deep
    #[arg(long, default_value = "fast")]
    mode: ThinkingMode,

    /// Prompt text; read from stdin when omitted
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bubble::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let prompt = if cli.prompt.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read prompt from stdin")?;
        input.trim().to_string()
    } else {
        cli.prompt.join(" ")
    };
    if prompt.is_empty() {
        bail!("No prompt given");
    }

    let orchestrator = Orchestrator::from_config(&cfg);
    let supervisor = SessionSupervisor::new();
    let cancel = supervisor.child_token();

    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping generation");
            on_ctrl_c.cancel();
        }
    });

    let sink = ChunkSink::new(|chunk| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    });

    let mut request = GenerationRequest::new("cli", "cli", prompt)
        .with_mode(cli.mode)
        .with_cancel(cancel)
        .with_chunk_sink(sink);
    if let Some(model) = cli.model {
        request = request.with_model(model);
    }

    let result = orchestrator.run(request).await;
    println!();
    if let Some(sources) = result.messages.first().and_then(|m| m.metadata.as_ref()) {
        for (i, source) in sources.grounding_metadata.iter().enumerate() {
            println!("[{}] {} - {}", i + 1, source.title, source.uri);
        }
    }

    supervisor.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_flags_and_prompt() {
        let cli = Cli::try_parse_from(["bubble", "--mode", "deep", "-m", "gemini-2.5-pro", "explain", "lifetimes"]).unwrap();
        assert_eq!(cli.mode, ThinkingMode::Deep);
        assert_eq!(cli.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(cli.prompt, vec!["explain", "lifetimes"]);

        let cli = Cli::try_parse_from(["bubble", "hi"]).unwrap();
        assert_eq!(cli.mode, ThinkingMode::Fast);
        assert!(Cli::try_parse_from(["bubble", "--mode", "turbo", "hi"]).is_err());
    }
}
