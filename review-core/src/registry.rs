use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::content::ContentObject;

/// Signature of a registered rule function: the content object plus
/// positional and keyword arguments, returning `None` on any failure.
pub type RuleFn = Arc<dyn Fn(&ContentObject, &[Value], &Map<String, Value>) -> Option<Value> + Send + Sync>;

/// Process-wide map from function name to implementation.
///
/// Populated once during bootstrap; read-only afterward, so lookups never
/// contend with writers in the steady state.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: Arc<DashMap<String, RuleFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `name`. Errors if the name is already taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        f: impl Fn(&ContentObject, &[Value], &Map<String, Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Result<(), String> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(format!("function '{name}' is already registered"));
        }
        self.functions.insert(name, Arc::new(f));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<RuleFn> {
        self.functions.get(name).map(|entry| entry.clone())
    }

    pub fn clear(&self) {
        self.functions.clear();
    }
}
