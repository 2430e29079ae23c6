use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::content::ContentObject;
use crate::registry::FunctionRegistry;

/// Resolves a user-defined function call during rule evaluation.
///
/// A `None` result is not an error: the caller treats it as "field absent"
/// and the enclosing condition short-circuits to false.
#[async_trait]
pub trait FunctionProvider: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        object: &ContentObject,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Option<Value>;
}

/// Looks functions up in the process-wide [`FunctionRegistry`] and executes
/// them in-process.
pub struct LocalProvider {
    registry: FunctionRegistry,
}

impl LocalProvider {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl FunctionProvider for LocalProvider {
    async fn execute(
        &self,
        name: &str,
        object: &ContentObject,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Option<Value> {
        match self.registry.get(name) {
            Some(f) => f(object, args, kwargs),
            None => {
                tracing::warn!(function = name, "no local function registered");
                None
            }
        }
    }
}

/// Resolves locally first, falling back to a remote provider (typically
/// [`review_rpc::RpcProvider`]) when the function isn't registered
/// in-process.
pub struct HybridProvider<R> {
    local: LocalProvider,
    remote: R,
}

impl<R: FunctionProvider> HybridProvider<R> {
    pub fn new(registry: FunctionRegistry, remote: R) -> Self {
        Self {
            local: LocalProvider::new(registry),
            remote,
        }
    }
}

#[async_trait]
impl<R: FunctionProvider> FunctionProvider for HybridProvider<R> {
    async fn execute(
        &self,
        name: &str,
        object: &ContentObject,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Option<Value> {
        if self.local.registry.get(name).is_some() {
            return self.local.execute(name, object, args, kwargs).await;
        }
        self.remote.execute(name, object, args, kwargs).await
    }
}
