use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::TargetType;

/// A field reference on the left-hand side of a [`Condition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    /// `"self"` or a dotted path such as `"author.level"`.
    Path(String),
    /// A user-defined function invocation.
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: serde_json::Map<String, Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Contains,
    NotContains,
    Regex,
    NotRegex,
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldRef,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
    Not,
    Xor,
    Xnor,
    Nand,
    Nor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub logic: Logic,
    pub conditions: Vec<RuleNode>,
}

/// A node in the boolean rule tree: either a leaf [`Condition`] or an
/// internal [`RuleGroup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
    Group(RuleGroup),
    Condition(Condition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub fid: i64,
    pub target_type: TargetType,
    pub name: String,
    pub enabled: bool,
    pub priority: i64,
    #[serde(default)]
    pub block: bool,
    pub trigger: RuleNode,
    #[serde(default)]
    pub actions: Vec<Action>,
}
