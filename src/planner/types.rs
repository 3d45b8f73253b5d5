//! 计划数据模型
//!
//! PlanDraft 是 LLM 回复的线上格式（schemars 生成 schema 写进 prompt），校验后转成封闭的 Plan 枚举，
//! 执行器只解释这几种数据形态。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 计划形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// 恰好一次调用
    SingleTool,
    /// 固定顺序的一次或多次调用
    Sequential,
    /// 首个调用之后跟若干决策点
    Conditional,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SingleTool => "single-tool",
            Strategy::Sequential => "sequential",
            Strategy::Conditional => "conditional",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// 注册表中的工具名
    pub tool: String,
    /// 工具输入（JSON 对象）
    #[serde(default = "empty_input")]
    pub input: Value,
    /// 瞬时失败（超时、工具报错）时是否重试
    #[serde(default)]
    pub retryable: bool,
    /// 单次调用超时（毫秒），缺省用配置值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn empty_input() -> Value {
    Value::Object(Default::default())
}

impl PlanStep {
    pub fn new(tool: impl Into<String>, input: Value) -> Self {
        Self {
            tool: tool.into(),
            input,
            retryable: false,
            timeout_ms: None,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// 分支条件，针对上一步输出求值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// 恒真（上一步已成功）
    Success,
    /// 输出文本包含子串：数组按元素逐个判断，其余非字符串输出按 JSON 文本判断
    Contains(String),
    /// 输出等于给定值
    Equals(Value),
    /// 输出中 JSON Pointer 指向的字段等于给定值
    FieldEquals { pointer: String, value: Value },
    /// 输出非 null、非空字符串、非空数组/对象
    NonEmpty,
}

impl Condition {
    pub fn evaluate(&self, output: &Value) -> bool {
        match self {
            Condition::Success => true,
            Condition::Contains(needle) => match output {
                Value::String(s) => s.contains(needle.as_str()),
                Value::Array(items) => items.iter().any(|v| self.evaluate(v)),
                other => other.to_string().contains(needle.as_str()),
            },
            Condition::Equals(expected) => output == expected,
            Condition::FieldEquals { pointer, value } => output.pointer(pointer) == Some(value),
            Condition::NonEmpty => match output {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                _ => true,
            },
        }
    }
}

/// 分支：条件成立时执行 steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Branch {
    pub when: Condition,
    pub steps: Vec<PlanStep>,
}

/// 决策点：第一个成立的分支执行，否则执行 otherwise（可缺省）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    pub branches: Vec<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Vec<PlanStep>>,
}

impl Decision {
    /// 选出要执行的步骤；无匹配且无 otherwise 时返回 None
    pub fn select(&self, output: &Value) -> Option<&[PlanStep]> {
        self.branches
            .iter()
            .find(|b| b.when.evaluate(output))
            .map(|b| b.steps.as_slice())
            .or(self.otherwise.as_deref())
    }

    fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.branches
            .iter()
            .flat_map(|b| b.steps.iter())
            .chain(self.otherwise.iter().flatten())
    }
}

/// LLM 回复的计划格式
///
/// single-tool：steps 恰好一项；sequential：steps 至少一项；
/// conditional：steps 为首个调用（恰好一项），decisions 至少一个。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanDraft {
    pub strategy: Strategy,
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<Decision>,
}

/// 已校验的计划
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    SingleTool(PlanStep),
    Sequential(Vec<PlanStep>),
    Conditional {
        first: PlanStep,
        decisions: Vec<Decision>,
    },
}

impl Plan {
    pub fn strategy(&self) -> Strategy {
        match self {
            Plan::SingleTool(_) => Strategy::SingleTool,
            Plan::Sequential(_) => Strategy::Sequential,
            Plan::Conditional { .. } => Strategy::Conditional,
        }
    }

    /// 计划中出现的全部步骤（含所有分支）
    pub fn all_steps(&self) -> Vec<&PlanStep> {
        match self {
            Plan::SingleTool(step) => vec![step],
            Plan::Sequential(steps) => steps.iter().collect(),
            Plan::Conditional { first, decisions } => std::iter::once(first)
                .chain(decisions.iter().flat_map(Decision::steps))
                .collect(),
        }
    }
}

impl TryFrom<PlanDraft> for Plan {
    type Error = String;

    fn try_from(draft: PlanDraft) -> Result<Self, Self::Error> {
        let PlanDraft {
            strategy,
            mut steps,
            decisions,
        } = draft;
        match strategy {
            Strategy::SingleTool => {
                if steps.len() != 1 || !decisions.is_empty() {
                    return Err(format!(
                        "single-tool plan needs exactly one step and no decisions, got {} step(s)",
                        steps.len()
                    ));
                }
                Ok(Plan::SingleTool(steps.remove(0)))
            }
            Strategy::Sequential => {
                if steps.is_empty() || !decisions.is_empty() {
                    return Err("sequential plan needs at least one step and no decisions".to_string());
                }
                Ok(Plan::Sequential(steps))
            }
            Strategy::Conditional => {
                if steps.len() != 1 || decisions.is_empty() {
                    return Err(
                        "conditional plan needs exactly one first step and at least one decision"
                            .to_string(),
                    );
                }
                if decisions.iter().any(|d| d.branches.is_empty()) {
                    return Err("every decision needs at least one branch".to_string());
                }
                Ok(Plan::Conditional {
                    first: steps.remove(0),
                    decisions,
                })
            }
        }
    }
}

/// 计划格式的 JSON Schema（写进规划 prompt）
pub fn plan_schema_json() -> String {
    let schema = schemars::schema_for!(PlanDraft);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_evaluate() {
        let out = json!({ "status": "ok", "items": [1] });
        assert!(Condition::Success.evaluate(&Value::Null));
        assert!(Condition::Contains("ok".into()).evaluate(&out));
        assert!(Condition::Contains("a.txt".into()).evaluate(&json!(["a.txt", "b.txt"])));
        assert!(!Condition::Contains("c.txt".into()).evaluate(&json!(["a.txt"])));
        assert!(Condition::Equals(json!("yes")).evaluate(&json!("yes")));
        assert!(Condition::FieldEquals {
            pointer: "/status".into(),
            value: json!("ok")
        }
        .evaluate(&out));
        assert!(!Condition::FieldEquals {
            pointer: "/missing".into(),
            value: json!("ok")
        }
        .evaluate(&out));
        assert!(Condition::NonEmpty.evaluate(&out));
        assert!(!Condition::NonEmpty.evaluate(&json!([])));
        assert!(!Condition::NonEmpty.evaluate(&json!("")));
    }

    #[test]
    fn test_contains_matches_substrings_inside_arrays() {
        let listing = json!(["a.txt", "notes.md"]);
        assert!(Condition::Contains("a.".into()).evaluate(&listing));
        assert!(Condition::Contains("notes".into()).evaluate(&listing));
        assert!(!Condition::Contains("todo".into()).evaluate(&listing));
        assert!(Condition::Contains("97".into()).evaluate(&json!([{ "usage": 97 }])));
        assert!(!Condition::Contains("x".into()).evaluate(&json!([])));
    }

    #[test]
    fn test_condition_wire_format() {
        let c: Condition = serde_json::from_value(json!("non_empty")).unwrap();
        assert_eq!(c, Condition::NonEmpty);
        let c: Condition = serde_json::from_value(json!({ "contains": "x" })).unwrap();
        assert_eq!(c, Condition::Contains("x".into()));
        let c: Condition =
            serde_json::from_value(json!({ "field_equals": { "pointer": "/a", "value": 1 } }))
                .unwrap();
        assert!(matches!(c, Condition::FieldEquals { .. }));
    }

    #[test]
    fn test_decision_select() {
        let decision = Decision {
            branches: vec![
                Branch {
                    when: Condition::Contains("error".into()),
                    steps: vec![PlanStep::new("report", json!({}))],
                },
                Branch {
                    when: Condition::Success,
                    steps: vec![PlanStep::new("summarize", json!({}))],
                },
            ],
            otherwise: None,
        };
        assert_eq!(decision.select(&json!("error!")).unwrap()[0].tool, "report");
        assert_eq!(decision.select(&json!("fine")).unwrap()[0].tool, "summarize");

        let strict = Decision {
            branches: vec![Branch {
                when: Condition::Equals(json!(1)),
                steps: vec![],
            }],
            otherwise: None,
        };
        assert!(strict.select(&json!(2)).is_none());
    }

    #[test]
    fn test_draft_shape_validation() {
        let step = PlanStep::new("echo", json!({ "text": "a" }));
        let single = PlanDraft {
            strategy: Strategy::SingleTool,
            steps: vec![step.clone(), step.clone()],
            decisions: vec![],
        };
        assert!(Plan::try_from(single).is_err());

        let conditional = PlanDraft {
            strategy: Strategy::Conditional,
            steps: vec![step.clone()],
            decisions: vec![],
        };
        assert!(Plan::try_from(conditional).is_err());

        let sequential = PlanDraft {
            strategy: Strategy::Sequential,
            steps: vec![step.clone(), step],
            decisions: vec![],
        };
        let plan = Plan::try_from(sequential).unwrap();
        assert_eq!(plan.strategy(), Strategy::Sequential);
        assert_eq!(plan.all_steps().len(), 2);
    }

    #[test]
    fn test_strategy_serde_and_schema() {
        assert_eq!(serde_json::to_value(Strategy::SingleTool).unwrap(), json!("single-tool"));
        let schema = plan_schema_json();
        assert!(schema.contains("single-tool"));
        assert!(schema.contains("field_equals"));
    }

    #[test]
    fn test_step_defaults() {
        let step: PlanStep = serde_json::from_value(json!({ "tool": "list_files" })).unwrap();
        assert_eq!(step.input, json!({}));
        assert!(!step.retryable);
        assert!(step.timeout_ms.is_none());
    }
}
