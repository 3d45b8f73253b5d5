//! Jarilo HTTP 服务
//!
//! 启动: cargo run --bin jarilo-web --features web
//! 提交任务: curl -X POST localhost:8080/api/tasks -H 'content-type: application/json' -d '{"prompt":"list files"}'

use std::sync::Arc;

use anyhow::Context;
use jarilo::config::load_config;
use jarilo::{api, observability, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let orchestrator = Arc::new(
        Orchestrator::from_config(&cfg)
            .await
            .context("Failed to build orchestrator")?,
    );
    let app = api::router(Arc::clone(&orchestrator));

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    tracing::info!(addr = %cfg.server.bind, "jarilo-web listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            orchestrator.shutdown();
        })
        .await?;
    Ok(())
}
