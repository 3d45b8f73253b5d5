//! 任务状态存储：StateManager
//!
//! 任务状态的唯一事实来源。外层 RwLock 只保护「id -> 任务」映射，
//! 每个任务再由自己的 Mutex 串行化写入，因此不同任务之间互不阻塞，
//! 同一任务的步骤日志不会交错写入。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::core::error::{StateError, TaskError};
use crate::planner::Strategy;

/// 任务 ID（task_<uuid>）
pub type TaskId = String;

/// 任务状态：只允许 pending → planning → executing → {succeeded | failed} 前向迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    /// 非终态之间的合法边；终态只能经 finalize 进入
    fn can_advance_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Planning) | (TaskStatus::Planning, TaskStatus::Executing)
        )
    }

    /// finalize 允许的终态边：succeeded 只能来自 executing，failed 可来自任一非终态
    fn can_finalize_to(&self, terminal: TaskStatus) -> bool {
        match terminal {
            TaskStatus::Succeeded => *self == TaskStatus::Executing,
            TaskStatus::Failed => !self.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次工具调用的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ok,
    Failed,
}

/// 执行步骤：一次工具调用尝试。重试会追加一条 attempt + 1 的新记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub tool_name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// 从 1 开始，仅重试时递增
    pub attempt: u32,
    pub status: StepStatus,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl ExecutionStep {
    pub fn pending(tool_name: impl Into<String>, input: Value, attempt: u32) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            output: None,
            error: None,
            attempt,
            status: StepStatus::Pending,
            started_at: now_ms(),
            finished_at: None,
        }
    }
}

/// 步骤结果：resolve_step 的输入
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Ok(Value),
    Failed(TaskError),
}

/// 任务终态载荷：finalize 的输入，二者恰好其一
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(Value),
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Succeeded(_) => TaskStatus::Succeeded,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }
}

/// 任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub steps: Vec<ExecutionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// 毫秒时间戳
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    fn new(prompt: String) -> Self {
        let now = now_ms();
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            prompt,
            status: TaskStatus::Pending,
            strategy: None,
            steps: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at);
    }

    fn ensure_not_terminal(&self, op: &str) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::InvalidState {
                task_id: self.id.clone(),
                reason: format!("cannot {op} a {} task", self.status),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Arc<Mutex<Task>>>,
    /// 创建顺序，供 list() 使用
    order: Vec<TaskId>,
    /// 终结顺序，仅在设置了保留上限时记录
    finished: VecDeque<TaskId>,
}

/// 任务状态管理器：并发安全，按任务串行化写入
#[derive(Default)]
pub struct StateManager {
    inner: RwLock<Inner>,
    /// 终态任务保留上限；None 表示不淘汰
    max_finished: Option<usize>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最多保留 max_finished 个终态任务（至少 1 个），超出时淘汰最早终结的
    pub fn with_retention(max_finished: usize) -> Self {
        Self {
            max_finished: Some(max_finished.max(1)),
            ..Self::default()
        }
    }

    /// 新建 pending 任务并返回 id
    pub async fn create_task(&self, prompt: impl Into<String>) -> TaskId {
        let task = Task::new(prompt.into());
        let id = task.id.clone();
        let mut inner = self.inner.write().await;
        inner.order.push(id.clone());
        inner.tasks.insert(id.clone(), Arc::new(Mutex::new(task)));
        tracing::debug!(task_id = %id, "task created");
        id
    }

    async fn entry(&self, task_id: &str) -> Result<Arc<Mutex<Task>>, StateError> {
        self.inner
            .read()
            .await
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(task_id.to_string()))
    }

    /// 返回任务快照
    pub async fn get(&self, task_id: &str) -> Result<Task, StateError> {
        let entry = self.entry(task_id).await?;
        let task = entry.lock().await;
        Ok(task.clone())
    }

    /// 前向迁移到非终态；终态只能经 finalize 进入
    pub async fn transition(&self, task_id: &str, next: TaskStatus) -> Result<(), StateError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.lock().await;
        if !task.status.can_advance_to(next) {
            return Err(StateError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: next,
            });
        }
        tracing::debug!(task_id = %task_id, from = %task.status, to = %next, "task transition");
        task.status = next;
        task.touch();
        Ok(())
    }

    /// 记录规划策略：仅 planning 阶段可设置，且只设置一次
    pub async fn set_strategy(&self, task_id: &str, strategy: Strategy) -> Result<(), StateError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.lock().await;
        if task.status != TaskStatus::Planning || task.strategy.is_some() {
            return Err(StateError::InvalidState {
                task_id: task_id.to_string(),
                reason: "strategy is set once, during planning".to_string(),
            });
        }
        task.strategy = Some(strategy);
        task.touch();
        Ok(())
    }

    /// 追加步骤，返回其下标
    pub async fn append_step(&self, task_id: &str, step: ExecutionStep) -> Result<usize, StateError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.lock().await;
        task.ensure_not_terminal("append a step to")?;
        task.steps.push(step);
        task.touch();
        Ok(task.steps.len() - 1)
    }

    /// 将 pending 步骤落定为 ok / failed；已落定的步骤不可再改
    pub async fn resolve_step(
        &self,
        task_id: &str,
        index: usize,
        outcome: StepOutcome,
    ) -> Result<(), StateError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.lock().await;
        task.ensure_not_terminal("resolve a step of")?;
        let step = task.steps.get_mut(index).ok_or_else(|| StateError::InvalidState {
            task_id: task_id.to_string(),
            reason: format!("no step at index {index}"),
        })?;
        if step.status != StepStatus::Pending {
            return Err(StateError::InvalidState {
                task_id: task_id.to_string(),
                reason: format!("step {index} is already {:?}", step.status),
            });
        }
        match outcome {
            StepOutcome::Ok(output) => {
                step.status = StepStatus::Ok;
                step.output = Some(output);
            }
            StepOutcome::Failed(error) => {
                step.status = StepStatus::Failed;
                step.error = Some(error);
            }
        }
        step.finished_at = Some(now_ms());
        task.touch();
        Ok(())
    }

    /// 写入终态与载荷，只允许一次
    pub async fn finalize(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), StateError> {
        self.write_outcome(task_id, outcome).await?;
        self.evict_finished(task_id).await;
        Ok(())
    }

    async fn write_outcome(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), StateError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Err(StateError::AlreadyFinalized(task_id.to_string()));
        }
        let terminal = outcome.status();
        if !task.status.can_finalize_to(terminal) {
            return Err(StateError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: terminal,
            });
        }
        match outcome {
            TaskOutcome::Succeeded(result) => task.result = Some(result),
            TaskOutcome::Failed(error) => {
                tracing::info!(task_id = %task_id, error = %error, "task failed");
                task.error = Some(error);
            }
        }
        task.status = terminal;
        task.touch();
        Ok(())
    }

    async fn evict_finished(&self, task_id: &str) {
        let Some(cap) = self.max_finished else {
            return;
        };
        let mut inner = self.inner.write().await;
        inner.finished.push_back(task_id.to_string());
        let mut evicted = Vec::new();
        while inner.finished.len() > cap {
            if let Some(old) = inner.finished.pop_front() {
                inner.tasks.remove(&old);
                evicted.push(old);
            }
        }
        if !evicted.is_empty() {
            inner.order.retain(|id| !evicted.contains(id));
            tracing::debug!(evicted = evicted.len(), "finished tasks evicted");
        }
    }

    /// 全部任务快照，按创建顺序
    pub async fn list(&self) -> Vec<Task> {
        let entries: Vec<Arc<Mutex<Task>>> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.tasks.get(id).cloned())
                .collect()
        };
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.lock().await.clone());
        }
        tasks
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
