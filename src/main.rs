//! Jarilo CLI
//!
//! `jarilo "<prompt>"` 执行一个任务并以 JSON 打印报告；`jarilo --plugins` 列出插件。
//! 可用 `--config <file>` 追加配置文件。

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use jarilo::config::load_config;
use jarilo::{observability, Orchestrator};

/// Jarilo - plan and run tool-based tasks from a natural-language prompt
#[derive(Parser, Debug)]
#[command(name = "jarilo", version, about, long_about = None)]
struct Cli {
    /// Task prompt, e.g. "list files in src"
    #[arg(value_name = "PROMPT", num_args = 0..)]
    prompt: Vec<String>,

    /// List plugins and their status instead of running a task
    #[arg(long)]
    plugins: bool,

    /// Extra configuration file layered over config/default.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load config")?;

    let prompt = cli.prompt.join(" ");
    if !cli.plugins && prompt.trim().is_empty() {
        bail!("a prompt is required (or pass --plugins)");
    }

    let orchestrator = Orchestrator::from_config(&cfg)
        .await
        .context("Failed to build orchestrator")?;

    if cli.plugins {
        let plugins = match orchestrator.plugins() {
            Some(manager) => manager.list().await,
            None => Vec::new(),
        };
        println!("{}", serde_json::to_string_pretty(&plugins)?);
        return Ok(());
    }

    let report = orchestrator
        .execute(&prompt)
        .await
        .context("Task execution failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
