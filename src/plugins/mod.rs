//! 插件系统：运行时发现与加载新工具
//!
//! 插件来源（目录清单或进程内定义）→ PluginManager::discover 记录 → load 原子注册其工具。

pub mod manager;
pub mod manifest;
pub mod source;

pub use manager::{Plugin, PluginId, PluginManager, PluginStatus};
pub use manifest::{OutputKind, PluginManifest, PluginSection, ToolManifest};
pub use source::{
    DirectoryPluginSource, DiscoveredPlugin, PluginDefinition, PluginSource, PluginToolSpec,
    StaticPluginSource, MANIFEST_FILE,
};
