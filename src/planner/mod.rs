//! 规划层：计划数据模型与 TaskPlanner

pub mod task_planner;
pub mod types;

pub use task_planner::{extract_json, parse_plan, TaskPlanner};
pub use types::{plan_schema_json, Branch, Condition, Decision, Plan, PlanDraft, PlanStep, Strategy};
