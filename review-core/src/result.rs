use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of matching one content event against the active rule set for
/// its scope, ready to be dispatched onto the action stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub fid: i64,
    pub matched_rule_ids: Vec<i64>,
    pub object_type: String,
    pub object_data: Value,
    pub function_call_results: HashMap<String, Value>,
    pub timestamp: f64,
}
