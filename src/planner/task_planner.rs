//! TaskPlanner：一次 LLM 调用把 prompt 映射为计划
//!
//! 请求 = system（规划说明 + 计划格式 schema + 工具目录）+ user（任务 prompt）。
//! 回复取 ```json 块或最外层 {...}，反序列化为 PlanDraft，校验形态与工具存在性后返回 Plan。
//! 规划器不重试、不持有状态：同样的 (prompt, 快照, LLM) 得到同样的结果。

use std::sync::Arc;

use crate::core::error::PlanningError;
use crate::llm::{LlmClient, Message};
use crate::planner::types::{plan_schema_json, Plan, PlanDraft};
use crate::tools::RegistrySnapshot;

const PLANNING_INSTRUCTIONS: &str = "You are the planner of a task orchestrator. \
Turn the user's task into a plan that calls the available tools. \
Reply with a single JSON object matching the plan schema, inside a ```json block, and nothing else.\n\
- \"single-tool\": exactly one step.\n\
- \"sequential\": one or more steps run in order; the task fails at the first failing step.\n\
- \"conditional\": exactly one first step, then \"decisions\"; each decision picks the first branch whose \
\"when\" matches the previous step's output, else \"otherwise\".\n\
Only use tool names from the catalogue and give each step an input object that satisfies the tool's input schema. \
Set \"retryable\": true only for steps that are safe to repeat.";

/// 从 LLM 回复中提取计划 JSON：优先 ```json 块，其次最外层 {...}
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// 解析并校验形态（不检查工具是否存在）
pub fn parse_plan(output: &str) -> Result<Plan, PlanningError> {
    let json = extract_json(output)
        .ok_or_else(|| PlanningError::UnrecognizedPlan("reply contains no JSON object".to_string()))?;
    let draft: PlanDraft = serde_json::from_str(json)
        .map_err(|e| PlanningError::UnrecognizedPlan(format!("{e}: {json}")))?;
    Plan::try_from(draft).map_err(PlanningError::UnrecognizedPlan)
}

/// 任务规划器
pub struct TaskPlanner {
    llm: Arc<dyn LlmClient>,
    plan_schema: String,
}

impl TaskPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            plan_schema: plan_schema_json(),
        }
    }

    fn system_prompt(&self, snapshot: &RegistrySnapshot) -> String {
        format!(
            "{PLANNING_INSTRUCTIONS}\n\n## Plan schema\n{}\n\n## Tool catalogue\n{}",
            self.plan_schema,
            snapshot.to_catalog_json()
        )
    }

    /// 为 prompt 生成计划；恰好发出一次 LLM 请求
    pub async fn plan(&self, prompt: &str, snapshot: &RegistrySnapshot) -> Result<Plan, PlanningError> {
        let messages = [Message::system(self.system_prompt(snapshot)), Message::user(prompt)];
        let reply = self.llm.complete(&messages).await.map_err(|e| {
            tracing::warn!(llm = self.llm.name(), error = %e, "planning request failed");
            PlanningError::Llm(e.to_string())
        })?;

        let plan = parse_plan(&reply)?;
        if let Some(step) = plan.all_steps().into_iter().find(|s| !snapshot.contains(&s.tool)) {
            return Err(PlanningError::UnknownTool(step.tool.clone()));
        }
        if let Some(step) = plan.all_steps().into_iter().find(|s| !s.input.is_object()) {
            return Err(PlanningError::UnrecognizedPlan(format!(
                "input for tool {} must be a JSON object",
                step.tool
            )));
        }
        tracing::debug!(strategy = %plan.strategy(), steps = plan.all_steps().len(), "plan ready");
        Ok(plan)
    }
}
