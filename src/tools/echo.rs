//! Echo 工具（测试用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

/// Echo 工具：原样返回 text
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing). Input: {\"text\": \"message\"}"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["text".to_string()]
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let text = input.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(Value::String(text.to_string()))
    }
}
