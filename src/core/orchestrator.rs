//! 编排器：任务生命周期的唯一驱动者
//!
//! execute：create_task → planning → plan → set_strategy → executing → run → 报告。
//! 规划失败直接 finalize(failed)，任务不会进入 executing。
//! 每个运行中的任务持有一个子 CancellationToken，cancel(task_id) 触发它。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::error::{OrchestratorError, TaskError, TaskErrorKind};
use crate::core::state::{ExecutionStep, StateManager, Task, TaskId, TaskOutcome, TaskStatus};
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::planner::{Strategy, TaskPlanner};
use crate::plugins::{DirectoryPluginSource, PluginManager, PluginStatus};
use crate::tools::{register_builtin_tools, ToolRegistry};

/// 返回给调用方的任务报告（终态任务的投影）
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub steps: Vec<ExecutionStep>,
}

impl From<Task> for TaskReport {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            strategy: task.strategy,
            result: task.result,
            error: task.error,
            steps: task.steps,
        }
    }
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    if cfg.llm.provider.eq_ignore_ascii_case("mock") {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }
    match cfg.llm.resolved_api_key() {
        Some(key) => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, &key)
                    .with_request_timeout(std::time::Duration::from_secs(cfg.llm.request_timeout_secs)),
            )
        }
        None => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 生命周期驱动所需的共享部件；execute / submit 都把它移进独立的 tokio 任务
struct Driver {
    planner: TaskPlanner,
    executor: TaskExecutor,
    state: Arc<StateManager>,
    registry: Arc<ToolRegistry>,
    running: Mutex<HashMap<TaskId, CancellationToken>>,
}

pub struct Orchestrator {
    driver: Arc<Driver>,
    plugins: Option<Arc<PluginManager>>,
    /// 所有任务令牌的父令牌
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, config: ExecutorConfig) -> Self {
        Self::with_state(llm, registry, config, Arc::new(StateManager::new()))
    }

    pub fn with_state(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        config: ExecutorConfig,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            driver: Arc::new(Driver {
                planner: TaskPlanner::new(llm),
                executor: TaskExecutor::new(registry.clone(), state.clone(), config),
                state,
                registry,
                running: Mutex::new(HashMap::new()),
            }),
            plugins: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_plugin_manager(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// 按配置组装：LLM、内置工具、插件目录（autoload 时 discover + load_all）
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, OrchestratorError> {
        let llm = create_llm_from_config(cfg);
        let workspace = cfg.tools.workspace_root();
        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry, &workspace).await?;

        let source = Arc::new(DirectoryPluginSource::new(cfg.plugins.dir.clone()).with_workspace(workspace));
        let plugins = Arc::new(PluginManager::new(source, registry.clone()));
        if cfg.plugins.autoload {
            if cfg.plugins.dir.is_dir() {
                plugins.discover().await?;
                for (id, outcome) in plugins.load_all().await {
                    if let Err(e) = outcome {
                        tracing::warn!(plugin = %id, error = %e, "plugin not loaded");
                    }
                }
            } else {
                tracing::info!(dir = %cfg.plugins.dir.display(), "plugin directory not found, skipping autoload");
            }
        }

        let state = Arc::new(StateManager::with_retention(cfg.app.max_finished_tasks));
        Ok(
            Self::with_state(llm, registry, cfg.executor.to_executor_config(), state)
                .with_plugin_manager(plugins),
        )
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.driver.registry
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.driver.state
    }

    pub fn plugins(&self) -> Option<&Arc<PluginManager>> {
        self.plugins.as_ref()
    }

    /// 执行一个任务直到终态
    ///
    /// 生命周期在独立的 tokio 任务中运行，调用方的 future 被丢弃时任务仍会走到终态。
    pub async fn execute(&self, prompt: &str) -> Result<TaskReport, OrchestratorError> {
        let driver = Arc::clone(&self.driver);
        let token = self.shutdown.child_token();
        let prompt = prompt.to_string();
        let task_id = tokio::spawn(async move {
            let task_id = driver.start(&prompt, token.clone()).await;
            Arc::clone(&driver)
                .drive_guarded(task_id.clone(), prompt, token)
                .await;
            task_id
        })
        .await?;
        Ok(self.driver.state.get(&task_id).await?.into())
    }

    /// 后台执行，立即返回任务 id 供轮询
    pub async fn submit(&self, prompt: impl Into<String>) -> TaskId {
        let prompt = prompt.into();
        let token = self.shutdown.child_token();
        let task_id = self.driver.start(&prompt, token.clone()).await;
        tokio::spawn(
            Arc::clone(&self.driver).drive_guarded(task_id.clone(), prompt, token),
        );
        task_id
    }

    /// 取消运行中的任务；任务不存在或已结束时返回 false
    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.driver.running.lock().await.get(task_id) {
            Some(token) => {
                tracing::info!(task_id = %task_id, "cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消全部运行中的任务
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn task(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        Ok(self.driver.state.get(task_id).await?)
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.driver.state.list().await
    }

    /// 运行中（持有取消令牌）的任务数
    pub async fn running(&self) -> usize {
        self.driver.running.lock().await.len()
    }

    /// 已加载插件数
    pub async fn loaded_plugins(&self) -> usize {
        match &self.plugins {
            Some(p) => p
                .list()
                .await
                .iter()
                .filter(|p| p.status == PluginStatus::Loaded)
                .count(),
            None => 0,
        }
    }
}

impl Driver {
    async fn start(&self, prompt: &str, token: CancellationToken) -> TaskId {
        let task_id = self.state.create_task(prompt).await;
        self.running.lock().await.insert(task_id.clone(), token);
        tracing::info!(task_id = %task_id, "task accepted");
        task_id
    }

    /// 在子任务中驱动；驱动过程 panic 时同样以 Internal 终结并释放令牌
    async fn drive_guarded(self: Arc<Self>, task_id: TaskId, prompt: String, token: CancellationToken) {
        let driver = Arc::clone(&self);
        let id = task_id.clone();
        let joined = tokio::spawn(async move { driver.drive(&id, &prompt, &token).await }).await;
        if let Err(e) = joined {
            tracing::error!(task_id = %task_id, error = %e, "task driver panicked");
            let error = TaskError::new(TaskErrorKind::Internal, format!("task driver panicked: {e}"));
            let _ = self.state.finalize(&task_id, TaskOutcome::Failed(error)).await;
            self.running.lock().await.remove(&task_id);
        }
    }

    /// 驱动任务到终态；状态机误用时以 Internal 错误兜底 finalize
    async fn drive(&self, task_id: &str, prompt: &str, token: &CancellationToken) {
        if let Err(e) = self.lifecycle(task_id, prompt, token).await {
            tracing::error!(task_id = %task_id, error = %e, "task lifecycle error");
            let error = TaskError::new(TaskErrorKind::Internal, e.to_string());
            // 已终结时这里会返回 AlreadyFinalized，忽略即可
            let _ = self.state.finalize(task_id, TaskOutcome::Failed(error)).await;
        }
        self.running.lock().await.remove(task_id);
    }

    async fn lifecycle(
        &self,
        task_id: &str,
        prompt: &str,
        token: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        self.state.transition(task_id, TaskStatus::Planning).await?;

        let snapshot = self.registry.snapshot().await;
        let plan = match self.planner.plan(prompt, &snapshot).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "planning failed");
                self.state
                    .finalize(task_id, TaskOutcome::Failed(e.into()))
                    .await?;
                return Ok(());
            }
        };
        if token.is_cancelled() {
            self.state
                .finalize(task_id, TaskOutcome::Failed(TaskError::cancelled()))
                .await?;
            return Ok(());
        }

        self.state.set_strategy(task_id, plan.strategy()).await?;
        self.state.transition(task_id, TaskStatus::Executing).await?;
        self.executor.run(task_id, &plan, token).await?;
        Ok(())
    }
}
