//! 命令工具：插件清单里声明的「程序 + 参数模板」
//!
//! 参数模板单遍展开：{{plugin_dir}} 为插件目录，{{workspace}} 为工作区根目录，
//! {{key}} 取调用输入中的 key；替换进来的文本不会再次展开，未知占位符报错。
//! 声明为路径的输入经 SafeFs 校验，必须落在工作区内。
//! 执行时无 shell，在工作区根目录下直接 exec program + 展开后的参数，带超时。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::tools::{SafeFs, Tool};

/// stdout 的解释方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// 去掉首尾空白后作为 JSON 字符串
    #[default]
    Text,
    /// 按 JSON 解析
    Json,
}

/// 外部命令工具
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    description: String,
    capabilities: Vec<String>,
    input_schema: Value,
    program: String,
    args_template: Vec<String>,
    plugin_dir: PathBuf,
    workspace: SafeFs,
    path_inputs: Vec<String>,
    timeout: Duration,
    output: OutputFormat,
}

impl CommandTool {
    /// 工作区缺省为插件目录，通常随后用 with_workspace 绑定真实工作区
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args_template: Vec<String>,
        plugin_dir: impl Into<PathBuf>,
    ) -> Self {
        let plugin_dir = plugin_dir.into();
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            input_schema: crate::tools::schema::empty_object_schema(),
            program: program.into(),
            args_template,
            workspace: SafeFs::new(&plugin_dir),
            plugin_dir,
            path_inputs: Vec::new(),
            timeout: Duration::from_secs(30),
            output: OutputFormat::Text,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_schema(mut self, input_schema: Value) -> Self {
        self.input_schema = input_schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_workspace(mut self, root: impl AsRef<Path>) -> Self {
        self.workspace = SafeFs::new(root);
        self
    }

    /// 这些输入键按工作区内路径解析
    pub fn with_path_inputs(mut self, keys: Vec<String>) -> Self {
        self.path_inputs = keys;
        self
    }

    fn substitute(&self, input: &Value) -> Result<Vec<String>, String> {
        let empty = Map::new();
        let obj = input.as_object().unwrap_or(&empty);
        self.args_template
            .iter()
            .map(|tpl| self.expand(tpl, obj))
            .collect()
    }

    fn expand(&self, template: &str, input: &Map<String, Value>) -> Result<String, String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            out.push_str(&self.placeholder(after[..end].trim(), input)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn placeholder(&self, key: &str, input: &Map<String, Value>) -> Result<String, String> {
        match key {
            "plugin_dir" => Ok(self.plugin_dir.to_string_lossy().into_owned()),
            "workspace" => Ok(self.workspace.root().to_string_lossy().into_owned()),
            _ => {
                let value = input
                    .get(key)
                    .ok_or_else(|| format!("no input value for placeholder '{key}'"))?;
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if self.path_inputs.iter().any(|k| k == key) {
                    let resolved = self.workspace.resolve(&text)?;
                    Ok(resolved.to_string_lossy().into_owned())
                } else {
                    Ok(text)
                }
            }
        }
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let args = self.substitute(&input)?;
        tracing::info!(tool = %self.name, program = %self.program, "command tool invoke");
        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(self.workspace.root())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn {} failed: {e}", self.program))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("command timeout after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("command wait failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        match self.output {
            OutputFormat::Text => Ok(Value::String(stdout.trim().to_string())),
            OutputFormat::Json => serde_json::from_str(stdout.trim())
                .map_err(|e| format!("invalid JSON output: {e}")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitute_placeholders() {
        let tool = CommandTool::new(
            "count",
            "wc",
            vec!["-l".into(), "{{plugin_dir}}/{{path}}".into(), "{{n}}".into()],
            "/opt/plugins/fs",
        );
        let args = tool.substitute(&json!({ "path": "a.txt", "n": 3 })).unwrap();
        assert_eq!(args, vec!["-l", "/opt/plugins/fs/a.txt", "3"]);
    }

    #[test]
    fn test_substitute_is_single_pass() {
        let tool = CommandTool::new("pair", "echo", vec!["{{a}}-{{b}}".into()], "/opt/plugins/fs");
        let args = tool.substitute(&json!({ "a": "{{b}}", "b": "x" })).unwrap();
        assert_eq!(args, vec!["{{b}}-x"]);

        let err = tool.substitute(&json!({ "a": "1" })).unwrap_err();
        assert!(err.contains("'b'"));

        let open = CommandTool::new("open", "echo", vec!["{{a".into()], "/opt/plugins/fs");
        assert_eq!(open.substitute(&json!({})).unwrap(), vec!["{{a"]);
    }

    #[tokio::test]
    async fn test_path_inputs_stay_in_workspace() {
        let outer = tempfile::tempdir().unwrap();
        let workspace = outer.path().join("ws");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::write(workspace.join("notes.md"), "alpha\nbeta\n").unwrap();
        std::fs::write(outer.path().join("secret.txt"), "x").unwrap();
        let plugin_dir = tempfile::tempdir().unwrap();

        let tool = CommandTool::new("show", "cat", vec!["{{path}}".into()], plugin_dir.path())
            .with_workspace(&workspace)
            .with_path_inputs(vec!["path".into()]);
        assert_eq!(
            tool.execute(json!({ "path": "notes.md" })).await.unwrap(),
            json!("alpha\nbeta")
        );

        let escape = tool.execute(json!({ "path": "../secret.txt" })).await.unwrap_err();
        assert!(escape.contains("escapes"));
        let absolute = outer.path().join("secret.txt").to_string_lossy().to_string();
        assert!(tool.execute(json!({ "path": absolute })).await.unwrap_err().contains("escapes"));
    }

    #[tokio::test]
    async fn test_runs_in_workspace_root() {
        let workspace = tempfile::tempdir().unwrap();
        let plugin_dir = tempfile::tempdir().unwrap();
        let root = SafeFs::new(workspace.path()).root().to_string_lossy().to_string();

        let pwd = CommandTool::new("where", "pwd", vec![], plugin_dir.path()).with_workspace(workspace.path());
        assert_eq!(pwd.execute(json!({})).await.unwrap(), json!(root.clone()));

        let echo = CommandTool::new("ws", "echo", vec!["{{workspace}}".into()], plugin_dir.path())
            .with_workspace(workspace.path());
        assert_eq!(echo.execute(json!({})).await.unwrap(), json!(root));
    }

    #[tokio::test]
    async fn test_text_and_json_output() {
        let dir = tempfile::tempdir().unwrap();
        let text = CommandTool::new("say", "echo", vec!["{{word}}".into()], dir.path());
        assert_eq!(text.execute(json!({ "word": "hello" })).await.unwrap(), json!("hello"));

        let json_tool = CommandTool::new("emit", "echo", vec![r#"{"n": 2}"#.into()], dir.path())
            .with_output(OutputFormat::Json);
        assert_eq!(json_tool.execute(json!({})).await.unwrap(), json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn test_failure_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let fail = CommandTool::new("fail", "false", vec![], dir.path());
        assert!(fail.execute(json!({})).await.unwrap_err().starts_with("exit"));

        let slow = CommandTool::new("slow", "sleep", vec!["5".into()], dir.path())
            .with_timeout(Duration::from_millis(50));
        assert!(slow.execute(json!({})).await.unwrap_err().contains("timeout"));

        let missing = CommandTool::new("ghost", "definitely-not-a-program", vec![], dir.path());
        assert!(missing.execute(json!({})).await.unwrap_err().contains("spawn"));
    }
}
