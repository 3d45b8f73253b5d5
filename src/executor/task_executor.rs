//! TaskExecutor：计划解释器
//!
//! 按计划顺序调用注册表中的工具；每次尝试先追加一条 pending 步骤，调用结束后落定为 ok / failed。
//! 可重试的步骤在瞬时失败（超时、工具报错）时按 BackoffPolicy 重试；任一步骤最终失败即 fail-fast。
//! 取消令牌在每个步骤边界与退避等待中检查，不打断正在进行的工具调用。
//! 执行器只调用 finalize，不做状态迁移。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::{StateError, TaskError};
use crate::core::state::{ExecutionStep, StateManager, StepOutcome, TaskOutcome};
use crate::executor::retry::BackoffPolicy;
use crate::planner::{Plan, PlanStep};
use crate::tools::ToolRegistry;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// 执行器参数
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// 步骤未指定 timeout_ms 时的单次调用超时
    pub step_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct TaskExecutor {
    registry: Arc<ToolRegistry>,
    state: Arc<StateManager>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(registry: Arc<ToolRegistry>, state: Arc<StateManager>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            state,
            config,
        }
    }

    /// 执行计划并 finalize 任务，返回写入的终态载荷
    ///
    /// 调用方需先把任务迁移到 executing；StateError 只在任务不存在或已终结时返回。
    pub async fn run(
        &self,
        task_id: &str,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, StateError> {
        self.state.get(task_id).await?;
        let outcome = match self.execute_plan(task_id, plan, cancel).await {
            Ok(result) => TaskOutcome::Succeeded(result),
            Err(error) => TaskOutcome::Failed(error),
        };
        self.state.finalize(task_id, outcome.clone()).await?;
        tracing::info!(
            task_id = %task_id,
            strategy = %plan.strategy(),
            status = %outcome.status(),
            "task finished"
        );
        Ok(outcome)
    }

    async fn execute_plan(
        &self,
        task_id: &str,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<Value, TaskError> {
        match plan {
            Plan::SingleTool(step) => self.run_step(task_id, step, cancel).await,
            Plan::Sequential(steps) => self.run_sequence(task_id, steps, Value::Null, cancel).await,
            Plan::Conditional { first, decisions } => {
                let mut last = self.run_step(task_id, first, cancel).await?;
                for (index, decision) in decisions.iter().enumerate() {
                    match decision.select(&last) {
                        Some(steps) => {
                            last = self.run_sequence(task_id, steps, last, cancel).await?;
                        }
                        None => {
                            tracing::debug!(task_id = %task_id, decision = index, "no branch matched");
                        }
                    }
                }
                Ok(last)
            }
        }
    }

    /// 顺序执行，返回最后一步输出；steps 为空时原样返回 last
    async fn run_sequence(
        &self,
        task_id: &str,
        steps: &[PlanStep],
        mut last: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, TaskError> {
        for step in steps {
            last = self.run_step(task_id, step, cancel).await?;
        }
        Ok(last)
    }

    /// 执行单个计划步骤（含重试）；失败时返回首次失败的错误并标注尝试次数
    async fn run_step(
        &self,
        task_id: &str,
        step: &PlanStep,
        cancel: &CancellationToken,
    ) -> Result<Value, TaskError> {
        let max_attempts = self.config.backoff.attempts_for(step.retryable);
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.step_timeout);
        let mut first_error: Option<TaskError> = None;
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(TaskError::cancelled());
            }

            let index = self
                .state
                .append_step(
                    task_id,
                    ExecutionStep::pending(&step.tool, step.input.clone(), attempt),
                )
                .await?;
            let result = self.invoke(task_id, step, attempt, timeout).await;

            match result {
                Ok(output) => {
                    self.state
                        .resolve_step(task_id, index, StepOutcome::Ok(output.clone()))
                        .await?;
                    return Ok(output);
                }
                Err(error) => {
                    self.state
                        .resolve_step(task_id, index, StepOutcome::Failed(error.clone()))
                        .await?;
                    let retry = error.is_transient() && attempt < max_attempts;
                    let cause = first_error.get_or_insert(error);
                    if !retry {
                        return Err(cause.clone().with_attempts(attempt));
                    }
                }
            }

            let delay = self.config.backoff.delay_for(attempt);
            tracing::debug!(task_id = %task_id, tool = %step.tool, attempt, delay_ms = delay.as_millis() as u64, "retrying step");
            tokio::select! {
                _ = cancel.cancelled() => return Err(TaskError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// 带超时调用一次工具，并输出结构化审计日志
    async fn invoke(
        &self,
        task_id: &str,
        step: &PlanStep,
        attempt: u32,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        let start = Instant::now();
        let result = tokio::time::timeout(timeout, self.registry.invoke(&step.tool, step.input.clone())).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "task_id": task_id,
            "tool": step.tool,
            "attempt": attempt,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": input_preview(&step.input),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TaskError::timeout(&step.tool, timeout.as_millis() as u64)),
        }
    }
}

fn input_preview(input: &Value) -> String {
    let s = input.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
