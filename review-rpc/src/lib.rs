//! gRPC-backed [`FunctionProvider`] for rules that call out to a remote
//! function execution service.

mod proto {
    tonic::include_proto!("review");
}

use async_trait::async_trait;
use proto::review_function_service_client::ReviewFunctionServiceClient;
use proto::ExecuteRequest;
use review_core::{ContentObject, FunctionProvider};
use serde_json::{Map, Value};
use std::time::Duration;
use tonic::transport::Channel;

/// Calls a remote `ReviewFunctionService` over gRPC. Any transport or
/// remote-side failure degrades to `None`, never an error, matching the
/// local provider's contract.
pub struct RpcProvider {
    client: ReviewFunctionServiceClient<Channel>,
    timeout: Duration,
}

impl RpcProvider {
    pub async fn connect(url: String, timeout: Duration) -> Result<Self, tonic::transport::Error> {
        let channel = Channel::from_shared(url)
            .expect("invalid RPC endpoint")
            .connect()
            .await?;
        Ok(Self {
            client: ReviewFunctionServiceClient::new(channel),
            timeout,
        })
    }
}

#[async_trait]
impl FunctionProvider for RpcProvider {
    async fn execute(
        &self,
        name: &str,
        object: &ContentObject,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Option<Value> {
        let request = ExecuteRequest {
            function_name: name.to_string(),
            data_json: object.to_value().to_string(),
            args_json: Value::Array(args.to_vec()).to_string(),
            kwargs_json: Value::Object(kwargs.clone()).to_string(),
        };

        let mut client = self.client.clone();
        let call = client.execute(request);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(resp)) => resp.into_inner(),
            Ok(Err(status)) => {
                tracing::warn!(function = name, error = %status, "rpc function call failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(function = name, "rpc function call timed out");
                return None;
            }
        };

        if !response.success {
            tracing::warn!(function = name, error = %response.error_message, "remote function reported failure");
            return None;
        }

        serde_json::from_str(&response.result_json).ok()
    }
}

#[cfg(test)]
mod tests {
    // Exercised indirectly via review-stream's integration tests, which
    // fake the provider trait instead of standing up a live gRPC server.
}
