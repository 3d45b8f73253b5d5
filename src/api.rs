//! HTTP 接入层（feature = "web"）
//!
//! 薄封装：把请求转成 Orchestrator 调用，响应即任务报告 / 插件 / 工具列表的 JSON。

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::{Orchestrator, OrchestratorError, StateError, TaskReport};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskQuery {
    /// true 时后台执行并立即返回 202
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: OrchestratorError) -> ApiError {
    let status = match &err {
        OrchestratorError::State(StateError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

/// 构建路由
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/cancel", post(cancel_task))
        .route("/api/plugins", get(list_plugins))
        .route("/api/tools", get(list_tools))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(orchestrator)
}

async fn create_task(
    State(orch): State<Arc<Orchestrator>>,
    Query(query): Query<CreateTaskQuery>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Response, ApiError> {
    if body.prompt.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt is required" })),
        ));
    }
    if query.run_async {
        let task_id = orch.submit(body.prompt).await;
        return Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))).into_response());
    }
    let report = orch.execute(&body.prompt).await.map_err(error_response)?;
    Ok(Json(report).into_response())
}

async fn get_task(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<TaskReport>, ApiError> {
    let task = orch.task(&id).await.map_err(error_response)?;
    Ok(Json(task.into()))
}

async fn cancel_task(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // 先确认任务存在，未知 id 返回 404
    orch.task(&id).await.map_err(error_response)?;
    let cancelled = orch.cancel(&id).await;
    Ok(Json(json!({ "task_id": id, "cancelled": cancelled })))
}

async fn list_plugins(State(orch): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let plugins = match orch.plugins() {
        Some(manager) => manager.list().await,
        None => Vec::new(),
    };
    Json(plugins)
}

async fn list_tools(State(orch): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(orch.registry().snapshot().await.tools().to_vec())
}
