use async_trait::async_trait;
use review_core::{ContentObject, FunctionProvider, HybridProvider, LocalProvider};
use review_rpc::RpcProvider;
use serde_json::{Map, Value};

/// The function provider selected at bootstrap: local-only, or hybrid
/// (local-first, RPC fallback), per the `RPC_ENABLED` setting.
pub enum ActiveProvider {
    Local(LocalProvider),
    Hybrid(HybridProvider<RpcProvider>),
}

#[async_trait]
impl FunctionProvider for ActiveProvider {
    async fn execute(
        &self,
        name: &str,
        object: &ContentObject,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Option<Value> {
        match self {
            ActiveProvider::Local(p) => p.execute(name, object, args, kwargs).await,
            ActiveProvider::Hybrid(p) => p.execute(name, object, args, kwargs).await,
        }
    }
}
