//! 执行层：计划解释器与步骤重试策略

pub mod retry;
pub mod task_executor;

pub use retry::BackoffPolicy;
pub use task_executor::{ExecutorConfig, TaskExecutor};
