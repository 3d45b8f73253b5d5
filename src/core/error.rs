//! 编排核心错误类型
//!
//! 每个组件一个 thiserror 枚举：StateError（状态机误用）、RegistryError（工具层）、
//! PlanningError（规划失败）、PluginError（插件发现/加载）；OrchestratorError 统一包装。
//! TaskError 是落在失败任务上的错误记录，可序列化返回给调用方。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::state::TaskStatus;

/// StateManager 错误：都是结构性误用，不做重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid state for task {task_id}: {reason}")]
    InvalidState { task_id: String, reason: String },

    #[error("Task already finalized: {0}")]
    AlreadyFinalized(String),
}

/// ToolRegistry 错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Schema violation for tool {tool}: {reason}")]
    SchemaViolation { tool: String, reason: String },

    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Invalid tool descriptor '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

/// 规划失败：模型调用失败、回复无法映射为合法计划、或计划引用了不存在的工具
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("Unrecognized plan: {0}")]
    UnrecognizedPlan(String),

    #[error("Plan references unknown tool: {0}")]
    UnknownTool(String),
}

/// 插件错误；Load 表示回滚已经完成
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin source unavailable: {0}")]
    Source(String),

    #[error("Invalid plugin manifest for {plugin}: {reason}")]
    Manifest { plugin: String, reason: String },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin {plugin} failed to load (rolled back): {reason}")]
    Load { plugin: String, reason: String },
}

/// 失败任务上的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    Planning,
    ToolNotFound,
    SchemaViolation,
    ToolExecution,
    Timeout,
    Cancelled,
    Internal,
}

/// 落在任务上的错误记录（终态 failed 时唯一的载荷）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    /// 出错的工具（规划失败、取消时为空）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// 出错步骤经历的尝试次数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tool: None,
            attempts: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TaskErrorKind::Cancelled, "Task cancelled")
    }

    pub fn timeout(tool: &str, after_ms: u64) -> Self {
        Self::new(
            TaskErrorKind::Timeout,
            format!("Tool {tool} timed out after {after_ms}ms"),
        )
        .with_tool(tool)
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// 仅瞬时故障（超时、工具执行失败）允许按步骤策略重试
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Timeout | TaskErrorKind::ToolExecution)
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<PlanningError> for TaskError {
    fn from(err: PlanningError) -> Self {
        TaskError::new(TaskErrorKind::Planning, err.to_string())
    }
}

impl From<RegistryError> for TaskError {
    fn from(err: RegistryError) -> Self {
        let (kind, tool) = match &err {
            RegistryError::ToolNotFound(name) => (TaskErrorKind::ToolNotFound, name.clone()),
            RegistryError::SchemaViolation { tool, .. } => {
                (TaskErrorKind::SchemaViolation, tool.clone())
            }
            RegistryError::ToolExecution { tool, .. } => (TaskErrorKind::ToolExecution, tool.clone()),
            RegistryError::InvalidDescriptor { name, .. } => (TaskErrorKind::Internal, name.clone()),
        };
        TaskError::new(kind, err.to_string()).with_tool(tool)
    }
}

impl From<StateError> for TaskError {
    fn from(err: StateError) -> Self {
        TaskError::new(TaskErrorKind::Internal, err.to_string())
    }
}

/// 编排器对外错误：只在状态机误用或环境故障时出现，业务失败落在 TaskError 上
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// 驱动任务的 tokio 任务 panic 或被中止
    #[error("Task driver failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
