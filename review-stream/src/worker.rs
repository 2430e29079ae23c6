use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis::streams::{StreamAutoClaimOptions, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use review_core::{ContentObject, FunctionProvider, RuleEngine, TargetType};
use review_data_sqlx::RuleRepository;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

pub struct StreamWorkerConfig {
    pub fid: i64,
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub concurrency_limit: usize,
    pub block: Duration,
    pub enable_recovery: bool,
    pub recovery_interval: Duration,
    pub min_idle_time: Duration,
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    object_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    object_id: i64,
    payload: serde_json::Value,
}

/// Consumes one scope's content stream, evaluates each event, and
/// dispatches matched rule outcomes. Owns one Redis consumer-group
/// membership and an optional pending-entry recovery loop.
pub struct StreamWorker<P> {
    config: StreamWorkerConfig,
    redis: redis::Client,
    repo: Arc<RuleRepository>,
    engine: Arc<RuleEngine<P>>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<WorkerState>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    recovery_cursor: Mutex<String>,
}

impl<P: FunctionProvider + 'static> StreamWorker<P> {
    pub fn new(
        config: StreamWorkerConfig,
        redis: redis::Client,
        repo: Arc<RuleRepository>,
        engine: Arc<RuleEngine<P>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            redis,
            repo,
            engine,
            dispatcher,
            state: Mutex::new(WorkerState::Created),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            recovery_cursor: Mutex::new("0-0".to_string()),
        }
    }

    pub fn fid(&self) -> i64 {
        self.config.fid
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    async fn ensure_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let result: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.config.stream_key, &self.config.consumer_group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Run the worker until `stop()` is called. Fatal setup errors (not
    /// "group already exists") are returned to the caller.
    pub async fn run(self: &Arc<Self>) -> Result<(), StreamError> {
        self.ensure_consumer_group().await?;
        *self.state.lock().unwrap() = WorkerState::Running;
        self.running.store(true, Ordering::SeqCst);

        let recovery_task = if self.config.enable_recovery {
            let this = Arc::clone(self);
            Some(tokio::spawn(async move { this.recovery_loop().await }))
        } else {
            None
        };

        let mut processors: JoinSet<()> = JoinSet::new();
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        while self.running.load(Ordering::SeqCst) {
            while processors.len() >= self.config.concurrency_limit {
                tokio::select! {
                    result = processors.join_next() => {
                        if let Some(Err(e)) = result {
                            tracing::error!(error = %e, "processor task panicked");
                        }
                    }
                    _ = self.cancel.cancelled() => break,
                }
                if self.cancel.is_cancelled() {
                    break;
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let quota = self.config.concurrency_limit - processors.len();
            let read_opts = StreamReadOptions::default()
                .group(&self.config.consumer_group, &self.config.consumer_name)
                .count(quota)
                .block(self.config.block.as_millis() as usize);

            let stream_keys = [self.config.stream_key.as_str()];
            let stream_ids = [">"];
            let reply: Option<StreamReadReply> = tokio::select! {
                r = conn.xread_options(&stream_keys, &stream_ids, &read_opts) => {
                    match r {
                        Ok(reply) => reply,
                        Err(e) => {
                            tracing::error!(error = %e, fid = self.config.fid, "xreadgroup failed");
                            None
                        }
                    }
                }
                _ = self.cancel.cancelled() => break,
            };

            let Some(reply) = reply else { continue };
            for key in reply.keys {
                for entry in key.ids {
                    let this = Arc::clone(self);
                    processors.spawn(async move { this.process_entry(entry).await });
                }
            }
        }

        while processors.join_next().await.is_some() {}
        if let Some(task) = recovery_task {
            let _ = task.await;
        }
        *self.state.lock().unwrap() = WorkerState::Stopped;
        Ok(())
    }

    async fn process_entry(&self, entry: redis::streams::StreamId) {
        let id = entry.id.clone();
        let data: Option<String> = entry
            .map
            .get("data")
            .and_then(|v| redis::from_redis_value::<String>(v.clone()).ok());

        let Some(data) = data else {
            self.ack(&id).await;
            return;
        };

        let envelope: StreamEnvelope = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, stream_id = %id, "malformed stream entry, acking");
                self.ack(&id).await;
                return;
            }
        };

        let target_type: TargetType = match envelope.object_type.parse() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, stream_id = %id, "unknown object_type, acking");
                self.ack(&id).await;
                return;
            }
        };

        if !envelope.payload.is_object() {
            tracing::warn!(stream_id = %id, "payload is not an object, acking");
            self.ack(&id).await;
            return;
        }

        let object = match ContentObject::from_typed(target_type, envelope.payload.clone()) {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(error = %e, stream_id = %id, "failed to deserialize content object, acking");
                self.ack(&id).await;
                return;
            }
        };

        let rules = self.repo.query(self.config.fid, target_type);
        let (matched, ctx) = self.engine.match_all(&object, &rules).await;

        if !matched.is_empty() {
            let timestamp = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            self.dispatcher
                .dispatch(
                    self.config.fid,
                    matched,
                    target_type.as_str(),
                    object.to_value(),
                    ctx,
                    timestamp,
                )
                .await;
        }

        self.ack(&id).await;
    }

    async fn ack(&self, id: &str) {
        let conn = self.redis.get_multiplexed_async_connection().await;
        let Ok(mut conn) = conn else {
            tracing::error!(stream_id = id, "failed to connect to redis to ack");
            return;
        };
        let result: Result<i64, RedisError> = conn
            .xack(&self.config.stream_key, &self.config.consumer_group, &[id])
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, stream_id = id, "failed to ack stream entry");
        }
    }

    async fn recovery_loop(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.recovery_interval) => {}
                _ = self.cancel.cancelled() => return,
            }
            if let Err(e) = self.recover_once().await {
                tracing::error!(error = %e, fid = self.config.fid, "recovery pass failed, resetting cursor");
                *self.recovery_cursor.lock().unwrap() = "0-0".to_string();
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                    _ = self.cancel.cancelled() => return,
                }
            }
        }
    }

    async fn recover_once(&self) -> Result<(), RedisError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let cursor = self.recovery_cursor.lock().unwrap().clone();
        let opts = StreamAutoClaimOptions::default().count(self.config.batch_size);
        let reply: redis::streams::StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.config.stream_key,
                &self.config.consumer_group,
                &self.config.consumer_name,
                self.config.min_idle_time.as_millis() as usize,
                cursor,
                opts,
            )
            .await?;

        *self.recovery_cursor.lock().unwrap() = reply.next_stream_id.clone();
        for entry in reply.claimed {
            self.process_entry(entry).await;
        }
        Ok(())
    }

    /// Stop accepting new batches. Already-spawned processors run to
    /// completion.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = WorkerState::Stopping;
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}
