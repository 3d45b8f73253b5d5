//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `JARILO__*` 覆盖（双下划线表示嵌套，如 `JARILO__EXECUTOR__MAX_ATTEMPTS=5`）。
//! 每个字段都有默认值，没有配置文件也能启动。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::executor::{BackoffPolicy, ExecutorConfig};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub executor: ExecutorSection,
    pub plugins: PluginsSection,
    pub server: ServerSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 内存中保留的终态任务上限，超出后淘汰最早终结的
    #[serde(default = "default_max_finished_tasks")]
    pub max_finished_tasks: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            max_finished_tasks: default_max_finished_tasks(),
        }
    }
}

fn default_app_name() -> String {
    "jarilo".to_string()
}

fn default_max_finished_tasks() -> usize {
    1000
}

/// [llm] 段：有 API Key（配置或 OPENAI_API_KEY）时走 OpenAI 兼容端点，否则用关键词 Mock
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LlmSection {
    /// 配置中的 key 优先，其次 OPENAI_API_KEY
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// [executor] 段：步骤超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl ExecutorSection {
    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            step_timeout: Duration::from_secs(self.step_timeout_secs),
            backoff: BackoffPolicy::new(
                self.max_attempts,
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_cap_ms),
            ),
        }
    }
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_cap_ms() -> u64 {
    5_000
}

/// [plugins] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PluginsSection {
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,
    /// 启动时 discover + load_all
    #[serde(default = "default_autoload")]
    pub autoload: bool,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            autoload: default_autoload(),
        }
    }
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_autoload() -> bool {
    true
}

/// [server] 段（jarilo-web）
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// [tools] 段：内置文件工具的沙箱根目录，未设置时用当前目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsSection {
    pub workspace_root: Option<PathBuf>,
}

impl ToolsSection {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// 从 config 目录加载配置，环境变量 JARILO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 JARILO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("JARILO")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.name, "jarilo");
        assert_eq!(cfg.app.max_finished_tasks, 1000);
        assert_eq!(cfg.executor.max_attempts, 3);
        assert!(cfg.plugins.autoload);
        assert_eq!(cfg.tools.workspace_root(), PathBuf::from("."));

        let exec = cfg.executor.to_executor_config();
        assert_eq!(exec.step_timeout, Duration::from_secs(30));
        assert_eq!(exec.backoff.delay_for(1), Duration::from_millis(200));
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[executor]\nmax_attempts = 5\n\n[plugins]\ndir = \"/opt/jarilo/plugins\"\nautoload = false\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.executor.max_attempts, 5);
        assert_eq!(cfg.executor.backoff_base_ms, 200);
        assert_eq!(cfg.plugins.dir, PathBuf::from("/opt/jarilo/plugins"));
        assert!(!cfg.plugins.autoload);
    }
}
