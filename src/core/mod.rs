//! 核心编排层：错误类型、任务状态存储、编排器

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::{
    OrchestratorError, PlanningError, PluginError, RegistryError, StateError, TaskError,
    TaskErrorKind,
};
pub use orchestrator::{create_llm_from_config, Orchestrator, TaskReport};
pub use state::{
    ExecutionStep, StateManager, StepOutcome, StepStatus, Task, TaskId, TaskOutcome, TaskStatus,
};
