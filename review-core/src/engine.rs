use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::content::ContentObject;
use crate::provider::FunctionProvider;
use crate::rule::{Condition, FieldRef, Logic, Operator, Rule, RuleGroup, RuleNode};

const PATH_CACHE_CAPACITY: usize = 1024;

/// Evaluates rule trees against content objects.
///
/// Holds two pieces of shared mutable state: a regex cache (one compiled
/// pattern per distinct source string) and a memoized dotted-path splitter.
/// Both are guarded so concurrent evaluations across tasks never race.
pub struct RuleEngine<P> {
    provider: P,
    regex_cache: DashMap<String, Option<Arc<Regex>>>,
    path_cache: Mutex<LruCache<String, Arc<Vec<String>>>>,
}

impl<P: FunctionProvider> RuleEngine<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            regex_cache: DashMap::new(),
            path_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PATH_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    fn split_path(&self, path: &str) -> Arc<Vec<String>> {
        let mut cache = self.path_cache.lock().unwrap();
        if let Some(parts) = cache.get(path) {
            return parts.clone();
        }
        let parts: Arc<Vec<String>> =
            Arc::new(path.split('.').map(|s| s.to_string()).collect());
        cache.put(path.to_string(), parts.clone());
        parts
    }

    fn compiled_regex(&self, pattern: &str) -> Option<Arc<Regex>> {
        if let Some(entry) = self.regex_cache.get(pattern) {
            return entry.clone();
        }
        let compiled = Regex::new(pattern).ok().map(Arc::new);
        self.regex_cache
            .insert(pattern.to_string(), compiled.clone());
        compiled
    }

    /// Resolve `"self"` or a dotted path against the object's JSON value.
    fn resolve_path(&self, object_value: &Value, path: &str) -> Option<Value> {
        if path == "self" {
            return Some(object_value.clone());
        }
        let parts = self.split_path(path);
        let mut current = object_value;
        for part in parts.iter() {
            match current.get(part) {
                Some(v) => current = v,
                None => return None,
            }
        }
        Some(current.clone())
    }

    /// Resolve a [`FieldRef`], executing function calls via the provider and
    /// recording their result under the function name in `ctx`.
    async fn resolve_field(
        &self,
        object: &ContentObject,
        object_value: &Value,
        field: &FieldRef,
        ctx: &mut HashMap<String, Value>,
    ) -> Option<Value> {
        match field {
            FieldRef::Path(path) => self.resolve_path(object_value, path),
            FieldRef::Call { name, args, kwargs } => {
                let result = self.provider.execute(name, object, args, kwargs).await;
                if let Some(v) = &result {
                    ctx.insert(name.clone(), v.clone());
                }
                result
            }
        }
    }

    async fn eval_condition(
        &self,
        object: &ContentObject,
        object_value: &Value,
        cond: &Condition,
        ctx: &mut HashMap<String, Value>,
    ) -> bool {
        let field_value = self
            .resolve_field(object, object_value, &cond.field, ctx)
            .await;
        let field_value = match field_value {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };

        match cond.operator {
            Operator::Contains => stringify(&field_value).contains(&stringify(&cond.value)),
            Operator::NotContains => !stringify(&field_value).contains(&stringify(&cond.value)),
            Operator::Regex => {
                let pattern = match cond.value.as_str() {
                    Some(p) => p,
                    None => return false,
                };
                match self.compiled_regex(pattern) {
                    Some(re) => re.is_match(&stringify(&field_value)),
                    None => false,
                }
            }
            Operator::NotRegex => {
                let pattern = match cond.value.as_str() {
                    Some(p) => p,
                    None => return true,
                };
                match self.compiled_regex(pattern) {
                    Some(re) => !re.is_match(&stringify(&field_value)),
                    None => true,
                }
            }
            Operator::Eq => field_value == cond.value,
            Operator::Neq => field_value != cond.value,
            Operator::Gt => natural_cmp(&field_value, &cond.value)
                .map(|o| o == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Operator::Lt => natural_cmp(&field_value, &cond.value)
                .map(|o| o == std::cmp::Ordering::Less)
                .unwrap_or(false),
            Operator::Gte => natural_cmp(&field_value, &cond.value)
                .map(|o| o != std::cmp::Ordering::Less)
                .unwrap_or(false),
            Operator::Lte => natural_cmp(&field_value, &cond.value)
                .map(|o| o != std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Operator::In => match cond.value.as_array() {
                Some(arr) => arr.contains(&field_value),
                None => false,
            },
            Operator::NotIn => match cond.value.as_array() {
                Some(arr) => !arr.contains(&field_value),
                None => false,
            },
        }
    }

    fn eval_node<'a>(
        &'a self,
        object: &'a ContentObject,
        object_value: &'a Value,
        node: &'a RuleNode,
        ctx: &'a mut HashMap<String, Value>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match node {
                RuleNode::Condition(cond) => self.eval_condition(object, object_value, cond, ctx).await,
                RuleNode::Group(group) => self.eval_group(object, object_value, group, ctx).await,
            }
        })
    }

    async fn eval_group(
        &self,
        object: &ContentObject,
        object_value: &Value,
        group: &RuleGroup,
        ctx: &mut HashMap<String, Value>,
    ) -> bool {
        if group.conditions.is_empty() {
            return false;
        }

        match group.logic {
            Logic::And => {
                for child in &group.conditions {
                    if !self.eval_node(object, object_value, child, ctx).await {
                        return false;
                    }
                }
                true
            }
            Logic::Or => {
                for child in &group.conditions {
                    if self.eval_node(object, object_value, child, ctx).await {
                        return true;
                    }
                }
                false
            }
            Logic::Not => {
                let first = &group.conditions[0];
                !self.eval_node(object, object_value, first, ctx).await
            }
            Logic::Nand => {
                for child in &group.conditions {
                    if !self.eval_node(object, object_value, child, ctx).await {
                        return true;
                    }
                }
                false
            }
            Logic::Nor => {
                for child in &group.conditions {
                    if self.eval_node(object, object_value, child, ctx).await {
                        return false;
                    }
                }
                true
            }
            Logic::Xor => {
                let mut true_count = 0;
                for child in &group.conditions {
                    if self.eval_node(object, object_value, child, ctx).await {
                        true_count += 1;
                    }
                }
                true_count % 2 == 1
            }
            Logic::Xnor => {
                let mut true_count = 0;
                for child in &group.conditions {
                    if self.eval_node(object, object_value, child, ctx).await {
                        true_count += 1;
                    }
                }
                true_count % 2 == 0
            }
        }
    }

    /// Evaluate a single rule against an object. Disabled rules never match.
    pub async fn matches(&self, object: &ContentObject, rule: &Rule) -> (bool, HashMap<String, Value>) {
        if !rule.enabled {
            return (false, HashMap::new());
        }
        let object_value = object.to_value();
        let mut ctx = HashMap::new();
        let matched = self
            .eval_node(object, &object_value, &rule.trigger, &mut ctx)
            .await;
        (matched, ctx)
    }

    /// Evaluate `rules` in order, stopping after the first rule with
    /// `block = true` matches. Returns matched rule ids in match order and
    /// the accumulated function-call context.
    pub async fn match_all(
        &self,
        object: &ContentObject,
        rules: &[Rule],
    ) -> (Vec<i64>, HashMap<String, Value>) {
        let mut matched = Vec::new();
        let mut ctx = HashMap::new();
        for rule in rules {
            let (is_match, rule_ctx) = self.matches(object, rule).await;
            ctx.extend(rule_ctx);
            if is_match {
                matched.push(rule.id);
                if rule.block {
                    break;
                }
            }
        }
        (matched, ctx)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn natural_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Author, Post};
    use crate::provider::FunctionProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct NullProvider;

    #[async_trait]
    impl FunctionProvider for NullProvider {
        async fn execute(
            &self,
            _name: &str,
            _object: &ContentObject,
            _args: &[Value],
            _kwargs: &serde_json::Map<String, Value>,
        ) -> Option<Value> {
            None
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FunctionProvider for CountingProvider {
        async fn execute(
            &self,
            _name: &str,
            _object: &ContentObject,
            _args: &[Value],
            _kwargs: &serde_json::Map<String, Value>,
        ) -> Option<Value> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Some(Value::Bool(true))
        }
    }

    fn post(text: &str) -> ContentObject {
        ContentObject::Post(Post {
            id: 1,
            fid: 7,
            tid: 1,
            text: text.to_string(),
            author: Author {
                id: 1,
                name: "a".into(),
                level: 3,
                portrait: None,
            },
            create_time: 0,
        })
    }

    fn contains_rule(id: i64, field: &str, needle: &str, block: bool) -> Rule {
        Rule {
            id,
            fid: 7,
            target_type: crate::content::TargetType::Post,
            name: format!("rule-{id}"),
            enabled: true,
            priority: 0,
            block,
            trigger: RuleNode::Condition(Condition {
                field: FieldRef::Path(field.to_string()),
                operator: Operator::Contains,
                value: Value::from(needle),
            }),
            actions: vec![],
        }
    }

    #[tokio::test]
    async fn contains_matches_substring() {
        let engine = RuleEngine::new(NullProvider);
        let rule = contains_rule(1, "text", "spam", false);
        let (matched, _) = engine.matches(&post("this is spam content"), &rule).await;
        assert!(matched);
        let (matched, _) = engine.matches(&post("clean content"), &rule).await;
        assert!(!matched);
    }

    #[tokio::test]
    async fn not_considers_only_first_child() {
        let engine = RuleEngine::new(NullProvider);
        let group = RuleGroup {
            logic: Logic::Not,
            conditions: vec![
                RuleNode::Condition(Condition {
                    field: FieldRef::Path("text".into()),
                    operator: Operator::Contains,
                    value: Value::from("spam"),
                }),
                // A trailing sibling that would flip the result if consulted.
                RuleNode::Condition(Condition {
                    field: FieldRef::Path("text".into()),
                    operator: Operator::Contains,
                    value: Value::from("clean"),
                }),
            ],
        };
        let rule = Rule {
            id: 1,
            fid: 7,
            target_type: crate::content::TargetType::Post,
            name: "not-rule".into(),
            enabled: true,
            priority: 0,
            block: false,
            trigger: RuleNode::Group(group),
            actions: vec![],
        };
        let engine_ref = &engine;
        let (matched, _) = engine_ref.matches(&post("this is spam content"), &rule).await;
        assert!(
            !matched,
            "NOT(contains 'spam') should be false even though the ignored sibling condition is false"
        );
    }

    #[tokio::test]
    async fn empty_group_is_always_false() {
        let engine = RuleEngine::new(NullProvider);
        let rule = Rule {
            id: 1,
            fid: 7,
            target_type: crate::content::TargetType::Post,
            name: "empty".into(),
            enabled: true,
            priority: 0,
            block: false,
            trigger: RuleNode::Group(RuleGroup {
                logic: Logic::And,
                conditions: vec![],
            }),
            actions: vec![],
        };
        let (matched, _) = engine.matches(&post("anything"), &rule).await;
        assert!(!matched);
    }

    #[tokio::test]
    async fn null_field_is_false_even_for_negative_operators() {
        let engine = RuleEngine::new(NullProvider);
        let rule = Rule {
            id: 1,
            fid: 7,
            target_type: crate::content::TargetType::Post,
            name: "missing-field".into(),
            enabled: true,
            priority: 0,
            block: false,
            trigger: RuleNode::Condition(Condition {
                field: FieldRef::Path("author.missing".into()),
                operator: Operator::NotContains,
                value: Value::from("x"),
            }),
            actions: vec![],
        };
        let (matched, _) = engine.matches(&post("anything"), &rule).await;
        assert!(!matched, "not_contains on a null field must be false, not true");
    }

    #[tokio::test]
    async fn invalid_regex_fails_open() {
        let engine = RuleEngine::new(NullProvider);
        let positive = Rule {
            id: 1,
            fid: 7,
            target_type: crate::content::TargetType::Post,
            name: "bad-regex".into(),
            enabled: true,
            priority: 0,
            block: false,
            trigger: RuleNode::Condition(Condition {
                field: FieldRef::Path("text".into()),
                operator: Operator::Regex,
                value: Value::from("(unterminated"),
            }),
            actions: vec![],
        };
        let (matched, _) = engine.matches(&post("anything"), &positive).await;
        assert!(!matched);

        let mut negative = positive.clone();
        negative.trigger = RuleNode::Condition(Condition {
            field: FieldRef::Path("text".into()),
            operator: Operator::NotRegex,
            value: Value::from("(unterminated"),
        });
        let (matched, _) = engine.matches(&post("anything"), &negative).await;
        assert!(matched);
    }

    #[tokio::test]
    async fn match_all_stops_after_blocking_rule() {
        let engine = RuleEngine::new(NullProvider);
        let rules = vec![
            contains_rule(1, "text", "spam", true),
            contains_rule(2, "text", "spam", false),
        ];
        let (matched, _) = engine.match_all(&post("spam spam"), &rules).await;
        assert_eq!(matched, vec![1]);
    }

    #[tokio::test]
    async fn function_call_short_circuits_when_not_registered() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
        };
        let engine = RuleEngine::new(provider);
        let rules = vec![Rule {
            id: 1,
            fid: 7,
            target_type: crate::content::TargetType::Post,
            name: "blocking-fn".into(),
            enabled: true,
            priority: 0,
            block: true,
            trigger: RuleNode::Condition(Condition {
                field: FieldRef::Call {
                    name: "flagged".into(),
                    args: vec![],
                    kwargs: Default::default(),
                },
                operator: Operator::Eq,
                value: Value::Bool(true),
            }),
            actions: vec![],
        }];
        let (matched, ctx) = engine.match_all(&post("x"), &rules).await;
        assert_eq!(matched, vec![1]);
        assert_eq!(ctx.get("flagged"), Some(&Value::Bool(true)));
    }
}
