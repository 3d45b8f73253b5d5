//! 插件清单（plugin.toml）
//!
//! ```toml
//! [plugin]
//! id = "fs-extras"
//! version = "0.1.0"
//!
//! [[tools]]
//! name = "count_lines"
//! program = "wc"
//! args = ["-l", "{{path}}"]
//! path_inputs = ["path"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::tools::{CommandTool, OutputFormat, ToolDescriptor};

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// [plugin] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSection {
    /// 缺省为插件目录名
    pub id: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Text,
    Json,
}

/// [[tools]] 条目：外部命令工具
#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub output: OutputKind,
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// 按工作区内路径解析的输入键
    #[serde(default)]
    pub path_inputs: Vec<String>,
}

impl ToolManifest {
    /// 构建命令工具描述符；program 以 ./ 开头时相对插件目录解析，命令在工作区内执行
    pub fn build(&self, plugin_dir: &Path, workspace: &Path) -> Result<ToolDescriptor, String> {
        if self.program.trim().is_empty() {
            return Err(format!("tool '{}' has an empty program", self.name));
        }
        let program = match self.program.strip_prefix("./") {
            Some(rel) => plugin_dir.join(rel).to_string_lossy().to_string(),
            None => self.program.clone(),
        };
        let output = match self.output {
            OutputKind::Text => OutputFormat::Text,
            OutputKind::Json => OutputFormat::Json,
        };
        let mut tool = CommandTool::new(&self.name, program, self.args.clone(), plugin_dir)
            .with_description(&self.description)
            .with_capabilities(self.capabilities.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_output(output)
            .with_workspace(workspace)
            .with_path_inputs(self.path_inputs.clone());
        if let Some(schema) = &self.input_schema {
            tool = tool.with_schema(schema.clone());
        }
        Ok(ToolDescriptor::from_tool(tool))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginSection,
    #[serde(default)]
    pub tools: Vec<ToolManifest>,
}

impl PluginManifest {
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// 插件 id：清单中的 id，缺省为目录名
    pub fn id_or(&self, fallback: &str) -> String {
        self.plugin
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANIFEST: &str = r#"
        [plugin]
        id = "fs-extras"
        version = "0.2.0"
        description = "extra filesystem tools"

        [[tools]]
        name = "count_lines"
        description = "count lines of a file"
        capabilities = ["filesystem"]
        program = "wc"
        args = ["-l", "{{path}}"]
        path_inputs = ["path"]
        timeout_secs = 5
        [tools.input_schema]
        type = "object"
        required = ["path"]
        [tools.input_schema.properties.path]
        type = "string"

        [[tools]]
        name = "stats"
        program = "./stats.sh"
        output = "json"
    "#;

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.id_or("dir"), "fs-extras");
        assert_eq!(manifest.plugin.version, "0.2.0");
        assert_eq!(manifest.tools.len(), 2);

        let count = &manifest.tools[0];
        assert_eq!(count.timeout_secs, 5);
        assert_eq!(count.path_inputs, vec!["path"]);
        assert!(manifest.tools[1].path_inputs.is_empty());
        assert_eq!(
            count.input_schema,
            Some(json!({
                "type": "object",
                "required": ["path"],
                "properties": { "path": { "type": "string" } }
            }))
        );
        assert_eq!(manifest.tools[1].output, OutputKind::Json);
        assert_eq!(manifest.tools[1].timeout_secs, 30);
    }

    #[test]
    fn test_id_defaults_to_dir_name() {
        let manifest = PluginManifest::parse("[plugin]\nversion = \"1.0.0\"").unwrap();
        assert_eq!(manifest.id_or("my-plugin"), "my-plugin");
        assert!(manifest.tools.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(PluginManifest::parse("not toml [").is_err());
        assert!(PluginManifest::parse("[[tools]]\nname = \"x\"\nprogram = \"y\"").is_err());
    }

    #[test]
    fn test_build_descriptor() {
        let manifest = PluginManifest::parse(MANIFEST).unwrap();
        let d = manifest.tools[0].build(Path::new("/plugins/fs"), Path::new("/work")).unwrap();
        assert_eq!(d.name, "count_lines");
        assert!(d.has_capability("filesystem"));
        assert_eq!(d.input_schema["required"], json!(["path"]));

        let mut empty = manifest.tools[1].clone();
        empty.program = " ".to_string();
        assert!(empty.build(Path::new("/plugins/fs"), Path::new("/work")).is_err());
    }
}
