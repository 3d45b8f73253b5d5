//! 工具输入 Schema 校验
//!
//! 只支持 JSON Schema 的一个子集：顶层 object、properties 的基础类型、required、enum、
//! additionalProperties: false。注册时校验 schema 本身，调用时校验输入。

use serde_json::{Map, Value};

const KNOWN_TYPES: &[&str] = &[
    "string", "number", "integer", "boolean", "array", "object", "null",
];

/// 无参数工具的默认 schema
pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 校验 schema 本身是否合法（注册时调用）
pub fn check_schema(schema: &Value) -> Result<(), String> {
    let obj = schema
        .as_object()
        .ok_or_else(|| "input schema must be a JSON object".to_string())?;

    if let Some(ty) = obj.get("type") {
        if ty.as_str() != Some("object") {
            return Err(format!("top-level type must be \"object\", got {ty}"));
        }
    }

    if let Some(props) = obj.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| "\"properties\" must be an object".to_string())?;
        for (key, prop) in props {
            let prop = prop
                .as_object()
                .ok_or_else(|| format!("property '{key}' must be an object"))?;
            if let Some(ty) = prop.get("type") {
                type_names(ty).map_err(|e| format!("property '{key}': {e}"))?;
            }
        }
    }

    if let Some(required) = obj.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| "\"required\" must be an array".to_string())?;
        if required.iter().any(|v| !v.is_string()) {
            return Err("\"required\" must only contain strings".to_string());
        }
    }

    Ok(())
}

/// 按 schema 校验工具输入（调用时）
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    let empty = Map::new();
    let schema = schema.as_object().unwrap_or(&empty);
    let input = input
        .as_object()
        .ok_or_else(|| format!("input must be a JSON object, got {}", kind_of(input)))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !input.contains_key(key) {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }

    let props = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in input {
        let Some(prop) = props.and_then(|p| p.get(key)) else {
            if closed {
                return Err(format!("unexpected field '{key}'"));
            }
            continue;
        };
        if let Some(ty) = prop.get("type") {
            let allowed = type_names(ty)?;
            if !allowed.iter().any(|t| matches_type(t, value)) {
                return Err(format!(
                    "field '{key}' expected {}, got {}",
                    allowed.join(" | "),
                    kind_of(value)
                ));
            }
        }
        if let Some(options) = prop.get("enum").and_then(Value::as_array) {
            if !options.contains(value) {
                return Err(format!("field '{key}' must be one of {}", Value::Array(options.clone())));
            }
        }
    }

    Ok(())
}

fn type_names(ty: &Value) -> Result<Vec<&str>, String> {
    let names: Vec<&str> = match ty {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        other => return Err(format!("\"type\" must be a string or array, got {other}")),
    };
    if let Some(bad) = names.iter().find(|n| !KNOWN_TYPES.contains(n)) {
        return Err(format!("unknown type '{bad}'"));
    }
    Ok(names)
}

fn matches_type(ty: &str, value: &Value) -> bool {
    match ty {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "depth": { "type": "integer" },
                "mode": { "type": "string", "enum": ["short", "long"] }
            },
            "required": ["path"]
        })
    }

    #[test]
    fn test_check_schema() {
        assert!(check_schema(&path_schema()).is_ok());
        assert!(check_schema(&empty_object_schema()).is_ok());
        assert!(check_schema(&json!({})).is_ok());
        assert!(check_schema(&json!("string")).is_err());
        assert!(check_schema(&json!({ "type": "array" })).is_err());
        assert!(check_schema(&json!({ "required": "path" })).is_err());
        assert!(check_schema(&json!({ "properties": { "x": { "type": "float" } } })).is_err());
    }

    #[test]
    fn test_validate_input_ok() {
        assert!(validate_input(&path_schema(), &json!({ "path": "." })).is_ok());
        assert!(validate_input(&path_schema(), &json!({ "path": ".", "depth": 2, "extra": true })).is_ok());
        assert!(validate_input(&empty_object_schema(), &json!({})).is_ok());
    }

    #[test]
    fn test_validate_input_violations() {
        let err = validate_input(&path_schema(), &json!({})).unwrap_err();
        assert!(err.contains("path"));

        let err = validate_input(&path_schema(), &json!({ "path": 42 })).unwrap_err();
        assert!(err.contains("expected string"));

        assert!(validate_input(&path_schema(), &json!({ "path": ".", "depth": 1.5 })).is_err());
        assert!(validate_input(&path_schema(), &json!({ "path": ".", "mode": "wide" })).is_err());
        assert!(validate_input(&path_schema(), &json!(["path"])).is_err());
    }

    #[test]
    fn test_closed_schema_rejects_unknown_fields() {
        let schema = json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "additionalProperties": false
        });
        assert!(validate_input(&schema, &json!({ "text": "hi" })).is_ok());
        assert!(validate_input(&schema, &json!({ "txt": "hi" })).is_err());
    }
}
