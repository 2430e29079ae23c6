use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use review_core::{FunctionProvider, RuleEngine};
use review_data_sqlx::RuleRepository;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::worker::{StreamWorker, StreamWorkerConfig};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Settings shared by every worker the manager spawns, minus the
/// scope-specific `fid`/`stream_key`.
#[derive(Clone)]
pub struct WorkerTemplate {
    pub base_stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub concurrency_limit: usize,
    pub block: Duration,
    pub enable_recovery: bool,
    pub recovery_interval: Duration,
    pub min_idle_time: Duration,
}

struct ActiveWorker<P> {
    worker: Arc<StreamWorker<P>>,
    task: JoinHandle<()>,
}

/// Reconciles the live worker set against the repository's active scopes,
/// spawning a [`StreamWorker`] per new scope and retiring workers for
/// scopes with no remaining rules.
pub struct WorkerManager<P> {
    repo: Arc<RuleRepository>,
    engine: Arc<RuleEngine<P>>,
    dispatcher: Arc<Dispatcher>,
    redis: redis::Client,
    template: WorkerTemplate,
    active: Mutex<HashMap<i64, ActiveWorker<P>>>,
    cancel: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: FunctionProvider + Send + Sync + 'static> WorkerManager<P> {
    pub fn new(
        repo: Arc<RuleRepository>,
        engine: Arc<RuleEngine<P>>,
        dispatcher: Arc<Dispatcher>,
        redis: redis::Client,
        template: WorkerTemplate,
    ) -> Self {
        Self {
            repo,
            engine,
            dispatcher,
            redis,
            template,
            active: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            loop_task: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        *self.loop_task.try_lock().expect("start() called concurrently") = Some(handle);
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            self.reconcile().await;
            tokio::select! {
                _ = tokio::time::sleep(RECONCILE_INTERVAL) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Diff `repo.active_fids()` against the live worker map: stop and
    /// remove workers for scopes no longer present, spawn workers for new
    /// scopes. Removal is best-effort (not awaited) so the reconcile tick
    /// never blocks on in-flight processors.
    pub async fn reconcile(&self) {
        let desired: std::collections::HashSet<i64> = self.repo.active_fids().into_iter().collect();
        let mut active = self.active.lock().await;
        let current: std::collections::HashSet<i64> = active.keys().copied().collect();
        let (to_remove, to_add) = diff_fids(&desired, &current);

        for fid in &to_remove {
            if let Some(entry) = active.remove(fid) {
                entry.worker.stop();
                tracing::info!(fid, "retiring worker: scope has no active rules");
            }
        }

        for fid in &to_add {
            let config = StreamWorkerConfig {
                fid: *fid,
                stream_key: format!("{}:{}", self.template.base_stream_key, fid),
                consumer_group: self.template.consumer_group.clone(),
                consumer_name: self.template.consumer_name.clone(),
                batch_size: self.template.batch_size,
                concurrency_limit: self.template.concurrency_limit,
                block: self.template.block,
                enable_recovery: self.template.enable_recovery,
                recovery_interval: self.template.recovery_interval,
                min_idle_time: self.template.min_idle_time,
            };
            let worker = Arc::new(StreamWorker::new(
                config,
                self.redis.clone(),
                Arc::clone(&self.repo),
                Arc::clone(&self.engine),
                Arc::clone(&self.dispatcher),
            ));
            let worker_for_task = Arc::clone(&worker);
            let task = tokio::spawn(async move {
                if let Err(e) = worker_for_task.run().await {
                    tracing::error!(error = %e, "worker exited with a fatal error");
                }
            });
            tracing::info!(fid, "spawned worker for new scope");
            active.insert(*fid, ActiveWorker { worker, task });
        }
    }

    /// Halt the reconciliation loop, then stop and await every active
    /// worker.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.loop_task.lock().await.take() {
            let _ = task.await;
        }
        let mut active = self.active.lock().await;
        for (_, entry) in active.drain() {
            entry.worker.stop();
            let _ = entry.task.await;
        }
    }

}

/// Split `desired` vs `current` scope ids into (to_remove, to_add).
fn diff_fids(
    desired: &std::collections::HashSet<i64>,
    current: &std::collections::HashSet<i64>,
) -> (Vec<i64>, Vec<i64>) {
    let mut to_remove: Vec<i64> = current.difference(desired).copied().collect();
    let mut to_add: Vec<i64> = desired.difference(current).copied().collect();
    to_remove.sort_unstable();
    to_add.sort_unstable();
    (to_remove, to_add)
}

#[cfg(test)]
mod tests {
    use super::diff_fids;
    use std::collections::HashSet;

    #[test]
    fn reconcile_diff_adds_new_scopes_and_removes_stale_ones() {
        let desired: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let current: HashSet<i64> = [2, 3, 4].into_iter().collect();
        let (to_remove, to_add) = diff_fids(&desired, &current);
        assert_eq!(to_remove, vec![4]);
        assert_eq!(to_add, vec![1]);
    }

    #[test]
    fn reconcile_diff_is_empty_when_sets_match() {
        let set: HashSet<i64> = [1, 2].into_iter().collect();
        let (to_remove, to_add) = diff_fids(&set, &set);
        assert!(to_remove.is_empty());
        assert!(to_add.is_empty());
    }

    #[test]
    fn reconcile_diff_handles_full_replacement() {
        let desired: HashSet<i64> = [10, 20].into_iter().collect();
        let current: HashSet<i64> = [30].into_iter().collect();
        let (mut to_remove, mut to_add) = diff_fids(&desired, &current);
        to_remove.sort_unstable();
        to_add.sort_unstable();
        assert_eq!(to_remove, vec![30]);
        assert_eq!(to_add, vec![10, 20]);
    }
}
