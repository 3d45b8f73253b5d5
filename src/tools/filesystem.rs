//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸）；
//! ListFilesTool / ReadFileTool 基于 SafeFs 提供 list_files / read_file 能力。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

/// 单次读取的最大字节数
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析相对路径并确认仍在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let path = path.trim_start_matches("./");
        if path.is_empty() || path == "." {
            return Ok(self.root_dir.clone());
        }
        let canonical = self
            .root_dir
            .join(path)
            .canonicalize()
            .map_err(|_| format!("Path not found: {path}"))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(format!("Path escapes workspace: {path}")) // 如 ../../etc/passwd
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;
        if meta.is_dir() {
            return Err(format!("Not a file: {path}"));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(format!("File too large: {path} ({} bytes)", meta.len()));
        }
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed: {e}"))
    }

    /// 列出目录，隐藏文件跳过，目录名带 / 后缀，按名称排序
    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = self.resolve(path)?;
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| format!("List failed: {e}"))?;
        let mut entries = Vec::new();
        while let Some(e) = dir.next_entry().await.map_err(|e| e.to_string())? {
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = e.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(entries)
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        }
    })
}

/// list_files：列出工作区目录
pub struct ListFilesTool {
    fs: SafeFs,
}

impl ListFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a workspace directory. Input: {\"path\": \"directory, default '.'\"}"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["filesystem".to_string(), "list".to_string()]
    }

    fn parameters_schema(&self) -> Value {
        path_schema("directory relative to the workspace root")
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        tracing::info!(path = %path, "list_files tool execute");
        let entries = self.fs.list_dir(path).await?;
        Ok(json!(entries))
    }
}

/// read_file：读取工作区内文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file in the workspace. Input: {\"path\": \"file path\"}"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["filesystem".to_string(), "read".to_string()]
    }

    fn parameters_schema(&self) -> Value {
        let mut schema = path_schema("file path relative to the workspace root");
        schema["required"] = json!(["path"]);
        schema
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let path = input.get("path").and_then(Value::as_str).unwrap_or_default();
        tracing::info!(path = %path, "read_file tool execute");
        self.fs.read_file(path).await.map(Value::String)
    }
}
