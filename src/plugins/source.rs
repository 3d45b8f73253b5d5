//! 插件来源
//!
//! PluginSource 只负责「发现」：列出插件定义，不注册任何工具。
//! DirectoryPluginSource 扫描 `<dir>/<plugin>/plugin.toml`；StaticPluginSource 提供进程内插件。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::PluginError;
use crate::plugins::manifest::{PluginManifest, ToolManifest};
use crate::tools::ToolDescriptor;

pub const MANIFEST_FILE: &str = "plugin.toml";

/// 插件声明的一个工具
#[derive(Debug, Clone)]
pub enum PluginToolSpec {
    /// 清单中的外部命令：dir 为插件目录，workspace 为执行目录与路径沙箱
    Command {
        manifest: ToolManifest,
        dir: PathBuf,
        workspace: PathBuf,
    },
    /// 进程内实现
    Native(ToolDescriptor),
}

impl PluginToolSpec {
    pub fn name(&self) -> &str {
        match self {
            PluginToolSpec::Command { manifest, .. } => &manifest.name,
            PluginToolSpec::Native(d) => &d.name,
        }
    }

    pub fn build(&self) -> Result<ToolDescriptor, String> {
        match self {
            PluginToolSpec::Command {
                manifest,
                dir,
                workspace,
            } => manifest.build(dir, workspace),
            PluginToolSpec::Native(d) => Ok(d.clone()),
        }
    }
}

/// 插件定义：元数据 + 声明的工具
#[derive(Debug, Clone)]
pub struct PluginDefinition {
    pub id: String,
    pub version: String,
    pub description: String,
    pub tools: Vec<PluginToolSpec>,
}

impl PluginDefinition {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            description: String::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tool(mut self, descriptor: ToolDescriptor) -> Self {
        self.tools.push(PluginToolSpec::Native(descriptor));
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    fn from_manifest(manifest: PluginManifest, dir: &Path, workspace: &Path, fallback_id: &str) -> Self {
        let mut definition = Self::new(manifest.id_or(fallback_id), manifest.plugin.version)
            .with_description(manifest.plugin.description);
        definition.tools = manifest
            .tools
            .into_iter()
            .map(|manifest| PluginToolSpec::Command {
                manifest,
                dir: dir.to_path_buf(),
                workspace: workspace.to_path_buf(),
            })
            .collect();
        definition
    }
}

/// 发现结果：清单无法解析时 definition 为 Err，插件以 failed 记录
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub id: String,
    pub definition: Result<PluginDefinition, PluginError>,
}

#[async_trait]
pub trait PluginSource: Send + Sync {
    /// 列出插件，顺序即发现顺序；来源不可读时返回 PluginError::Source
    async fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError>;

    /// 来源描述（日志用）
    fn describe(&self) -> String;
}

/// 目录来源：每个子目录一个插件，按目录名排序
///
/// 命令工具在 workspace 下执行（缺省为当前目录）。
#[derive(Debug, Clone)]
pub struct DirectoryPluginSource {
    dir: PathBuf,
    workspace: PathBuf,
}

impl DirectoryPluginSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            workspace: PathBuf::from("."),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    async fn read_plugin(&self, plugin_dir: &Path, dir_name: &str) -> DiscoveredPlugin {
        let manifest_path = plugin_dir.join(MANIFEST_FILE);
        let parsed = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(text) => PluginManifest::parse(&text),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(manifest) => {
                let definition =
                    PluginDefinition::from_manifest(manifest, plugin_dir, &self.workspace, dir_name);
                DiscoveredPlugin {
                    id: definition.id.clone(),
                    definition: Ok(definition),
                }
            }
            Err(reason) => {
                tracing::warn!(plugin = %dir_name, error = %reason, "invalid plugin manifest");
                DiscoveredPlugin {
                    id: dir_name.to_string(),
                    definition: Err(PluginError::Manifest {
                        plugin: dir_name.to_string(),
                        reason,
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl PluginSource for DirectoryPluginSource {
    async fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PluginError::Source(format!("{}: {e}", self.dir.display())))?;

        let mut plugin_dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginError::Source(e.to_string()))?
        {
            let path = entry.path();
            if path.is_dir() && path.join(MANIFEST_FILE).exists() {
                plugin_dirs.push(path);
            }
        }
        plugin_dirs.sort();

        let mut discovered = Vec::with_capacity(plugin_dirs.len());
        for path in plugin_dirs {
            let dir_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            discovered.push(self.read_plugin(&path, &dir_name).await);
        }
        Ok(discovered)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

/// 进程内来源：内置插件包与测试
#[derive(Debug, Clone, Default)]
pub struct StaticPluginSource {
    plugins: Vec<PluginDefinition>,
}

impl StaticPluginSource {
    pub fn new(plugins: Vec<PluginDefinition>) -> Self {
        Self { plugins }
    }
}

#[async_trait]
impl PluginSource for StaticPluginSource {
    async fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError> {
        Ok(self
            .plugins
            .iter()
            .cloned()
            .map(|definition| DiscoveredPlugin {
                id: definition.id.clone(),
                definition: Ok(definition),
            })
            .collect())
    }

    fn describe(&self) -> String {
        format!("static ({} plugins)", self.plugins.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(root: &Path, dir: &str, manifest: &str) {
        let plugin_dir = root.join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[tokio::test]
    async fn test_directory_discovery_order_and_failures() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(
            root.path(),
            "b-plugin",
            "[plugin]\nid = \"beta\"\n[[tools]]\nname = \"b_tool\"\nprogram = \"true\"",
        );
        write_plugin(
            root.path(),
            "a-plugin",
            "[plugin]\ndescription = \"first\"\n[[tools]]\nname = \"a_tool\"\nprogram = \"true\"",
        );
        write_plugin(root.path(), "c-broken", "this is not toml = [");
        std::fs::create_dir(root.path().join("not-a-plugin")).unwrap();

        let found = DirectoryPluginSource::new(root.path()).discover().await.unwrap();
        let ids: Vec<&str> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a-plugin", "beta", "c-broken"]);

        let a = found[0].definition.as_ref().unwrap();
        assert_eq!(a.tool_names(), vec!["a_tool"]);
        assert_eq!(a.version, "0.0.0");
        assert_eq!(a.description, "first");
        assert!(matches!(found[2].definition, Err(PluginError::Manifest { .. })));
    }

    #[tokio::test]
    async fn test_missing_directory_is_source_error() {
        let root = tempfile::tempdir().unwrap();
        let source = DirectoryPluginSource::new(root.path().join("absent"));
        assert!(matches!(source.discover().await, Err(PluginError::Source(_))));
    }
}
