//! 工具注册表
//!
//! 所有工具实现 Tool trait，包装成 ToolDescriptor（名称、能力标签、输入 schema、调用入口）后
//! 由 ToolRegistry 按名注册。注册表在多个任务间共享：内部 RwLock 只在查表/改表时持有，
//! 调用工具前先克隆出描述符并释放锁。批量注册在同一把写锁内完成，失败时整体回滚。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::error::RegistryError;
use crate::tools::schema;

/// 工具 trait：名称、描述（供 LLM 理解）、能力标签、参数 schema、异步执行（输入输出均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（计划中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 能力标签，规划器按标签匹配
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        schema::empty_object_schema()
    }

    /// 执行工具；输入已按 schema 校验
    async fn execute(&self, input: Value) -> Result<Value, String>;
}

/// 已注册能力的描述符
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub input_schema: Value,
    pub invoke: Arc<dyn Tool>,
}

impl ToolDescriptor {
    /// 从 Tool 实现构建，名称/描述/标签/schema 均取自工具本身
    pub fn from_tool(tool: impl Tool + 'static) -> Self {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            capabilities: tool.capabilities(),
            input_schema: tool.parameters_schema(),
            invoke: tool,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.capabilities.contains(&tag) {
            self.capabilities.push(tag);
        }
        self
    }

    pub fn with_schema(mut self, input_schema: Value) -> Self {
        self.input_schema = input_schema;
        self
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            capabilities: self.capabilities.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidDescriptor {
                name: self.name.clone(),
                reason: "name must be non-empty and contain no whitespace".to_string(),
            });
        }
        schema::check_schema(&self.input_schema).map_err(|reason| RegistryError::InvalidDescriptor {
            name: self.name.clone(),
            reason,
        })
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// 描述符的可序列化视图（不含调用入口），用于规划 prompt 与 HTTP 列表
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub input_schema: Value,
}

/// 注册表快照：规划器看到的只读能力全景，按注册顺序
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    tools: Vec<ToolInfo>,
}

impl RegistrySnapshot {
    pub fn new(tools: Vec<ToolInfo>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 生成 prompt 中的工具目录（JSON）
    pub fn to_catalog_json(&self) -> String {
        serde_json::to_string_pretty(&self.tools).unwrap_or_else(|_| "[]".to_string())
    }
}

struct Entry {
    /// 首次注册序号；替换时保留，保证 list 顺序稳定
    seq: u64,
    descriptor: ToolDescriptor,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_seq: u64,
}

impl Entries {
    /// 插入或替换，返回被替换的旧条目
    fn insert(&mut self, descriptor: ToolDescriptor) -> Option<Entry> {
        let seq = match self.map.get(&descriptor.name) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.map
            .insert(descriptor.name.clone(), Entry { seq, descriptor })
    }

    fn unregister_all<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> usize {
        names
            .into_iter()
            .filter(|name| self.map.remove(*name).is_some())
            .count()
    }

    fn ordered(&self) -> Vec<&ToolDescriptor> {
        let mut entries: Vec<&Entry> = self.map.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.descriptor).collect()
    }
}

/// 工具注册表：名称唯一，重复注册同名工具为「后写者胜」的原子替换
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Entries>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        descriptor.validate()?;
        tracing::debug!(tool = %descriptor.name, "registering tool");
        self.entries.write().await.insert(descriptor);
        Ok(())
    }

    /// 在一把写锁内注册整批描述符；任一失败则回滚本批已注册的工具并恢复被替换的旧描述符，
    /// 读方看到的要么是注册前、要么是注册后的状态
    pub async fn register_all(&self, descriptors: Vec<ToolDescriptor>) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let mut registered: Vec<(String, Option<Entry>)> = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if let Err(e) = descriptor.validate() {
                tracing::warn!(tool = %descriptor.name, error = %e, "batch registration failed, rolling back");
                for (name, previous) in registered.into_iter().rev() {
                    entries.unregister_all([name.as_str()]);
                    if let Some(previous) = previous {
                        entries.map.insert(name, previous);
                    }
                }
                return Err(e);
            }
            let name = descriptor.name.clone();
            let previous = entries.insert(descriptor);
            registered.push((name, previous));
        }
        Ok(())
    }

    pub async fn lookup(&self, name: &str) -> Result<ToolDescriptor, RegistryError> {
        self.entries
            .read()
            .await
            .map
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| RegistryError::ToolNotFound(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.map.contains_key(name)
    }

    /// 按能力标签过滤，按注册顺序返回
    pub async fn list_by_capability(&self, tag: &str) -> Vec<ToolDescriptor> {
        self.entries
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(|d| d.has_capability(tag))
            .cloned()
            .collect()
    }

    /// 查表、按 schema 校验输入、调用工具；调用期间不持有锁
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value, RegistryError> {
        let descriptor = self.lookup(name).await?;
        schema::validate_input(&descriptor.input_schema, &input).map_err(|reason| {
            RegistryError::SchemaViolation {
                tool: name.to_string(),
                reason,
            }
        })?;
        descriptor
            .invoke
            .execute(input)
            .await
            .map_err(|message| RegistryError::ToolExecution {
                tool: name.to_string(),
                message,
            })
    }

    /// 移除单个工具，返回是否存在
    pub async fn unregister(&self, name: &str) -> bool {
        self.entries.write().await.unregister_all([name]) == 1
    }

    /// 在一把写锁内移除一组工具，返回实际移除的数量
    pub async fn unregister_all(&self, names: &[String]) -> usize {
        let removed = self
            .entries
            .write()
            .await
            .unregister_all(names.iter().map(String::as_str));
        tracing::debug!(requested = names.len(), removed, "unregistered tools");
        removed
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::new(
            self.entries
                .read()
                .await
                .ordered()
                .into_iter()
                .map(ToolDescriptor::info)
                .collect(),
        )
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .ordered()
            .into_iter()
            .map(|d| d.name.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
