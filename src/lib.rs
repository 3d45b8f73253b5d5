//! Jarilo - 任务编排核心
//!
//! 把自然语言任务交给 LLM 规划成工具调用计划，再按计划执行并记录每一步。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务状态机（StateManager）、编排器（Orchestrator）
//! - **executor**: 计划解释器（TaskExecutor）与重试策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **planner**: 计划数据模型与 TaskPlanner
//! - **plugins**: 插件发现、加载、卸载
//! - **tools**: Tool trait、ToolRegistry、输入校验与内置工具
//! - **api**: HTTP 接入层（feature = "web"）

#[cfg(feature = "web")]
pub mod api;
pub mod config;
pub mod core;
pub mod executor;
pub mod llm;
pub mod observability;
pub mod planner;
pub mod plugins;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorError, TaskReport};
