//! 插件管理器
//!
//! discover 只记录插件，load 把插件声明的全部工具经 register_all 一次性注册（失败即整体回滚），
//! unload 按插件拥有的工具名成组移除。加载/卸载在管理器内部串行执行，
//! 注册表的读方只会看到插件的「全部工具」或「没有工具」。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::error::PluginError;
use crate::plugins::source::{PluginDefinition, PluginSource};
use crate::tools::ToolRegistry;

/// 插件 ID
pub type PluginId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Discovered,
    Loaded,
    Failed,
}

/// 插件元数据（list 返回的快照）
#[derive(Debug, Clone, Serialize)]
pub struct Plugin {
    pub id: PluginId,
    pub version: String,
    pub description: String,
    pub status: PluginStatus,
    /// 插件声明（加载后即拥有）的工具名
    pub provided_tools: Vec<String>,
    /// 最近一次发现或加载失败的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Record {
    meta: Plugin,
    /// 清单无法解析时为 None
    definition: Option<PluginDefinition>,
}

#[derive(Default)]
struct Records {
    map: HashMap<PluginId, Record>,
    order: Vec<PluginId>,
}

impl Records {
    /// 已加载的其它插件中拥有 tool 的那个
    fn owner_of(&self, tool: &str, except: &str) -> Option<&str> {
        self.map
            .values()
            .filter(|r| r.meta.id != except && r.meta.status == PluginStatus::Loaded)
            .find(|r| r.meta.provided_tools.iter().any(|t| t == tool))
            .map(|r| r.meta.id.as_str())
    }
}

pub struct PluginManager {
    source: Arc<dyn PluginSource>,
    registry: Arc<ToolRegistry>,
    records: Mutex<Records>,
}

impl PluginManager {
    pub fn new(source: Arc<dyn PluginSource>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            source,
            registry,
            records: Mutex::new(Records::default()),
        }
    }

    /// 读取插件来源并记录插件（不加载）；已知插件保留状态，未加载的刷新定义
    pub async fn discover(&self) -> Result<Vec<PluginId>, PluginError> {
        let found = self.source.discover().await?;
        let mut records = self.records.lock().await;
        let mut ids = Vec::with_capacity(found.len());

        for plugin in found {
            let id = plugin.id.clone();
            if ids.contains(&id) {
                tracing::warn!(plugin = %id, "duplicate plugin id in source, keeping the first");
                continue;
            }
            ids.push(id.clone());

            let (definition, last_error) = match plugin.definition {
                Ok(def) => (Some(def), None),
                Err(e) => (None, Some(e.to_string())),
            };

            if let Some(existing) = records.map.get_mut(&id) {
                if existing.meta.status != PluginStatus::Loaded {
                    if let Some(def) = &definition {
                        existing.meta.version = def.version.clone();
                        existing.meta.description = def.description.clone();
                        existing.meta.provided_tools = def.tool_names();
                    }
                    if last_error.is_some() {
                        existing.meta.status = PluginStatus::Failed;
                        existing.meta.last_error = last_error;
                    }
                    existing.definition = definition;
                }
                continue;
            }

            let meta = match &definition {
                Some(def) => Plugin {
                    id: id.clone(),
                    version: def.version.clone(),
                    description: def.description.clone(),
                    status: PluginStatus::Discovered,
                    provided_tools: def.tool_names(),
                    last_error: None,
                },
                None => Plugin {
                    id: id.clone(),
                    version: String::new(),
                    description: String::new(),
                    status: PluginStatus::Failed,
                    provided_tools: Vec::new(),
                    last_error,
                },
            };
            records.order.push(id.clone());
            records.map.insert(id, Record { meta, definition });
        }

        tracing::info!(source = %self.source.describe(), count = ids.len(), "plugins discovered");
        Ok(ids)
    }

    /// 加载插件：全部工具注册成功才置为 loaded；失败时已回滚、状态 failed 并返回 Load 错误
    pub async fn load(&self, plugin_id: &str) -> Result<(), PluginError> {
        let mut records = self.records.lock().await;
        let record = records
            .map
            .get(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        if record.meta.status == PluginStatus::Loaded {
            return Ok(());
        }

        let result = match &record.definition {
            None => Err(record
                .meta
                .last_error
                .clone()
                .unwrap_or_else(|| "plugin has no valid manifest".to_string())),
            Some(def) => self.try_register(&records, plugin_id, def).await,
        };

        let Some(record) = records.map.get_mut(plugin_id) else {
            return Err(PluginError::NotFound(plugin_id.to_string()));
        };
        match result {
            Ok(tools) => {
                tracing::info!(plugin = %plugin_id, tools = ?tools, "plugin loaded");
                record.meta.provided_tools = tools;
                record.meta.status = PluginStatus::Loaded;
                record.meta.last_error = None;
                Ok(())
            }
            Err(reason) => {
                tracing::warn!(plugin = %plugin_id, error = %reason, "plugin load failed");
                record.meta.status = PluginStatus::Failed;
                record.meta.last_error = Some(reason.clone());
                Err(PluginError::Load {
                    plugin: plugin_id.to_string(),
                    reason,
                })
            }
        }
    }

    /// 构建并注册插件的全部工具，返回注册的工具名；出错时注册表保持原样
    async fn try_register(
        &self,
        records: &Records,
        plugin_id: &str,
        def: &PluginDefinition,
    ) -> Result<Vec<String>, String> {
        let mut descriptors = Vec::with_capacity(def.tools.len());
        for spec in &def.tools {
            let descriptor = spec.build()?;
            if descriptors.iter().any(|d: &crate::tools::ToolDescriptor| d.name == descriptor.name) {
                return Err(format!("tool '{}' is declared twice", descriptor.name));
            }
            if let Some(owner) = records.owner_of(&descriptor.name, plugin_id) {
                return Err(format!(
                    "tool '{}' is already provided by plugin '{owner}'",
                    descriptor.name
                ));
            }
            descriptors.push(descriptor);
        }
        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        self.registry
            .register_all(descriptors)
            .await
            .map_err(|e| e.to_string())?;
        Ok(names)
    }

    /// 卸载插件：移除其全部工具，状态回到 discovered；对未加载的插件为空操作
    pub async fn unload(&self, plugin_id: &str) -> Result<(), PluginError> {
        let mut records = self.records.lock().await;
        let record = records
            .map
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        if record.meta.status != PluginStatus::Loaded {
            return Ok(());
        }
        let removed = self.registry.unregister_all(&record.meta.provided_tools).await;
        record.meta.status = PluginStatus::Discovered;
        tracing::info!(plugin = %plugin_id, removed, "plugin unloaded");
        Ok(())
    }

    /// 按发现顺序逐个加载尚未加载的插件，互不影响
    pub async fn load_all(&self) -> Vec<(PluginId, Result<(), PluginError>)> {
        let pending: Vec<PluginId> = {
            let records = self.records.lock().await;
            records
                .order
                .iter()
                .filter(|id| {
                    records
                        .map
                        .get(*id)
                        .is_some_and(|r| r.meta.status != PluginStatus::Loaded)
                })
                .cloned()
                .collect()
        };
        let mut outcomes = Vec::with_capacity(pending.len());
        for id in pending {
            let result = self.load(&id).await;
            outcomes.push((id, result));
        }
        outcomes
    }

    /// 插件元数据，按发现顺序
    pub async fn list(&self) -> Vec<Plugin> {
        let records = self.records.lock().await;
        records
            .order
            .iter()
            .filter_map(|id| records.map.get(id).map(|r| r.meta.clone()))
            .collect()
    }

    pub async fn get(&self, plugin_id: &str) -> Option<Plugin> {
        self.records
            .lock()
            .await
            .map
            .get(plugin_id)
            .map(|r| r.meta.clone())
    }
}
