use redis::AsyncCommands;
use review_core::ReviewResult;
use std::collections::HashMap;

/// Appends matched-rule outcomes to the action stream. Never fails the
/// caller: broker errors are logged and swallowed, matching the "at most
/// best effort" delivery guarantee for downstream action consumers.
pub struct Dispatcher {
    redis: redis::Client,
    action_stream_key: String,
}

impl Dispatcher {
    pub fn new(redis: redis::Client, action_stream_key: String) -> Self {
        Self {
            redis,
            action_stream_key,
        }
    }

    pub async fn dispatch(
        &self,
        fid: i64,
        matched_rule_ids: Vec<i64>,
        object_type: &str,
        object_data: serde_json::Value,
        function_call_results: HashMap<String, serde_json::Value>,
        timestamp: f64,
    ) {
        if matched_rule_ids.is_empty() {
            return;
        }

        let result = ReviewResult {
            fid,
            matched_rule_ids,
            object_type: object_type.to_string(),
            object_data,
            function_call_results,
            timestamp,
        };

        let payload = match serde_json::to_string(&result) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize review result");
                return;
            }
        };

        let conn = self.redis.get_multiplexed_async_connection().await;
        let mut conn = match conn {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to redis for dispatch");
                return;
            }
        };

        let sent: Result<String, _> = conn
            .xadd(&self.action_stream_key, "*", &[("data", payload.as_str())])
            .await;
        if let Err(e) = sent {
            tracing::error!(error = %e, fid, "failed to append review result to action stream");
        }
    }
}
