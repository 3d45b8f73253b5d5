//! 测试用 LLM 客户端（无需 API）
//!
//! MockLlmClient：按关键词把最后一条 User 消息映射成计划 JSON，便于本地跑通编排流程。
//! ScriptedLlmClient：按顺序返回预置回复，并记录收到的请求。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::message::last_user_content;
use crate::llm::{LlmClient, LlmError, Message};

/// 关键词规划器：子句以 " then " 分隔；一个子句为 single-tool，多个为 sequential
///
/// - `list ...` / `ls ...` → list_files（`in <dir>` 指定目录）
/// - `read <path>` / `cat <path>` → read_file
/// - `echo <text>` 及其它 → echo
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn step_for(clause: &str) -> Value {
        let clause = clause.trim();
        let lower = clause.to_lowercase();
        let mut words = clause.split_whitespace();
        let first = words.next().map(str::to_lowercase).unwrap_or_default();

        if first == "list" || first == "ls" || lower.contains("list files") {
            let dir = lower
                .split_once(" in ")
                .map(|(_, rest)| rest.trim().trim_end_matches(['.', '?']).to_string())
                .unwrap_or_else(|| ".".to_string());
            return json!({ "tool": "list_files", "input": { "path": dir } });
        }
        if first == "read" || first == "cat" {
            if let Some(path) = words.last() {
                return json!({ "tool": "read_file", "input": { "path": path } });
            }
        }
        let text = if first == "echo" {
            clause[first.len()..].trim()
        } else {
            clause
        };
        json!({ "tool": "echo", "input": { "text": text } })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let prompt = last_user_content(messages).unwrap_or_default();
        let steps: Vec<Value> = prompt
            .split(" then ")
            .filter(|c| !c.trim().is_empty())
            .map(Self::step_for)
            .collect();
        let strategy = if steps.len() > 1 { "sequential" } else { "single-tool" };
        let steps = if steps.is_empty() {
            vec![Self::step_for(prompt)]
        } else {
            steps
        };
        let plan = json!({ "strategy": strategy, "steps": steps });
        Ok(format!("```json\n{plan}\n```"))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 预置回复的客户端；回复用尽后返回 Fatal
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results(replies: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求数
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// 已收到的请求（按顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|_| LlmError::Fatal("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Fatal("script exhausted".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
