//! 工具层：Tool trait、注册表、输入校验与内置工具

pub mod command;
pub mod echo;
pub mod filesystem;
pub mod registry;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

pub use command::{CommandTool, OutputFormat};
pub use echo::EchoTool;
pub use filesystem::{ListFilesTool, ReadFileTool, SafeFs};
pub use registry::{RegistrySnapshot, Tool, ToolDescriptor, ToolInfo, ToolRegistry};

use crate::core::error::RegistryError;

/// 注册内置工具：echo、list_files、read_file（后两者绑定工作区根目录）
pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    workspace_root: impl AsRef<Path>,
) -> Result<(), RegistryError> {
    let root = workspace_root.as_ref();
    let builtins: Vec<Arc<dyn Tool>> = vec![
        Arc::new(EchoTool),
        Arc::new(ListFilesTool::new(root)),
        Arc::new(ReadFileTool::new(root)),
    ];
    registry
        .register_all(builtins.into_iter().map(ToolDescriptor::from_arc).collect())
        .await
}
