use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use review_core::{Rule, TargetType};
use review_data::DataError;
use serde::Deserialize;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SqlxErrorExt;

#[derive(Debug, Deserialize)]
struct RuleChangeEvent {
    #[serde(rename = "type")]
    kind: String,
    rule_id: i64,
}

struct State {
    rules: Vec<Rule>,
    by_scope: HashMap<(i64, TargetType), Vec<Rule>>,
    last_synced_at: DateTime<Utc>,
}

impl State {
    fn empty() -> Self {
        State {
            rules: Vec::new(),
            by_scope: HashMap::new(),
            last_synced_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Rebuild the scope index from `rules`, sorted ascending by priority
    /// then id within each bucket.
    fn rebuild_index(&mut self) {
        self.rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        let mut by_scope: HashMap<(i64, TargetType), Vec<Rule>> = HashMap::new();
        for rule in &self.rules {
            by_scope
                .entry((rule.fid, rule.target_type))
                .or_default()
                .push(rule.clone());
        }
        self.by_scope = by_scope;
    }

    fn upsert(&mut self, rule: Rule) {
        self.rules.retain(|r| r.id != rule.id);
        self.rules.push(rule);
        self.rebuild_index();
    }

    fn remove(&mut self, id: i64) {
        self.rules.retain(|r| r.id != id);
        self.rebuild_index();
    }
}

/// In-memory cache of active rules kept convergent with Postgres via a
/// pub/sub notification channel and a periodic polling fallback.
pub struct RuleRepository {
    pool: PgPool,
    redis: redis::Client,
    rules_channel: String,
    sync_interval: std::time::Duration,
    state: Mutex<State>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct RuleRow {
    id: i64,
    fid: i64,
    target_type: String,
    name: String,
    enabled: bool,
    priority: i64,
    block: bool,
    trigger: serde_json::Value,
    actions: serde_json::Value,
}

impl RuleRow {
    fn into_rule(self) -> Result<Rule, DataError> {
        let target_type: TargetType = self.target_type.parse().map_err(DataError::Other)?;
        let trigger = serde_json::from_value(self.trigger)
            .map_err(|e| DataError::Other(format!("rule {}: bad trigger json: {e}", self.id)))?;
        let actions = serde_json::from_value(self.actions)
            .map_err(|e| DataError::Other(format!("rule {}: bad actions json: {e}", self.id)))?;
        Ok(Rule {
            id: self.id,
            fid: self.fid,
            target_type,
            name: self.name,
            enabled: self.enabled,
            priority: self.priority,
            block: self.block,
            trigger,
            actions,
        })
    }
}

fn row_to_rule_row(row: &sqlx::postgres::PgRow) -> Result<RuleRow, DataError> {
    Ok(RuleRow {
        id: row.try_get("id").map_err(SqlxErrorExt::into_data_error)?,
        fid: row.try_get("fid").map_err(SqlxErrorExt::into_data_error)?,
        target_type: row.try_get("target_type").map_err(SqlxErrorExt::into_data_error)?,
        name: row.try_get("name").map_err(SqlxErrorExt::into_data_error)?,
        enabled: row.try_get("enabled").map_err(SqlxErrorExt::into_data_error)?,
        priority: row.try_get("priority").map_err(SqlxErrorExt::into_data_error)?,
        block: row.try_get("block").map_err(SqlxErrorExt::into_data_error)?,
        trigger: row.try_get("trigger").map_err(SqlxErrorExt::into_data_error)?,
        actions: row.try_get("actions").map_err(SqlxErrorExt::into_data_error)?,
    })
}

impl RuleRepository {
    pub fn new(
        pool: PgPool,
        redis: redis::Client,
        rules_channel: String,
        sync_interval: std::time::Duration,
    ) -> Self {
        Self {
            pool,
            redis,
            rules_channel,
            sync_interval,
            state: Mutex::new(State::empty()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn fetch_row(&self, id: i64) -> Result<Option<Rule>, DataError> {
        let row = sqlx::query(
            "SELECT id, fid, target_type, name, enabled, priority, block, trigger, actions \
             FROM rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_data_error)?;

        let Some(row) = row else { return Ok(None) };
        match row_to_rule_row(&row)?.into_rule() {
            Ok(rule) => Ok(Some(rule)),
            Err(e) => {
                tracing::warn!(rule_id = id, error = %e, "skipping unparsable rule");
                Ok(None)
            }
        }
    }

    /// Bulk load all enabled rules. Failure here is fatal to the caller.
    pub async fn load_initial(&self) -> Result<(), DataError> {
        let rows = sqlx::query(
            "SELECT id, fid, target_type, name, enabled, priority, block, trigger, actions \
             FROM rules WHERE enabled = true",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_data_error)?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_rule_row(row)?.into_rule() {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!(error = %e, "skipping unparsable rule during initial load"),
            }
        }

        let mut state = self.state.lock().unwrap();
        state.rules = rules;
        state.rebuild_index();
        state.last_synced_at = Utc::now();
        Ok(())
    }

    /// Rules applicable to `(fid, kind)`: scope-specific plus `all`, sorted
    /// ascending by priority then id.
    pub fn query(&self, fid: i64, kind: TargetType) -> Vec<Rule> {
        let state = self.state.lock().unwrap();
        let mut merged: Vec<Rule> = Vec::new();
        if let Some(scoped) = state.by_scope.get(&(fid, kind)) {
            merged.extend(scoped.iter().cloned());
        }
        if kind != TargetType::All {
            if let Some(all) = state.by_scope.get(&(fid, TargetType::All)) {
                merged.extend(all.iter().cloned());
            }
        }
        merged.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        merged
    }

    pub fn active_fids(&self) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        let mut fids: Vec<i64> = state.rules.iter().map(|r| r.fid).collect();
        fids.sort_unstable();
        fids.dedup();
        fids
    }

    /// Spawn the notification listener and the polling loop.
    pub fn start_sync(self: &Arc<Self>) {
        let listener = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_listener().await })
        };
        let poller = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_poller().await })
        };
        self.tasks.lock().unwrap().extend([listener, poller]);
    }

    async fn run_listener(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let result = self.listen_once().await;
            if let Err(e) = result {
                tracing::error!(error = %e, "rule notification listener failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                    _ = self.cancel.cancelled() => return,
                }
            }
        }
    }

    async fn listen_once(&self) -> Result<(), DataError> {
        let mut pubsub = self.redis.get_async_pubsub().await.map_err(DataError::database)?;
        pubsub
            .subscribe(&self.rules_channel)
            .await
            .map_err(DataError::database)?;
        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                msg = futures_util::StreamExt::next(&mut stream) => {
                    let Some(msg) = msg else { return Ok(()) };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => { tracing::warn!(error = %e, "bad pubsub payload"); continue; }
                    };
                    self.handle_event(&payload).await;
                }
                _ = self.cancel.cancelled() => {
                    return Ok(());
                }
            }
        }
    }

    async fn handle_event(&self, payload: &str) {
        let event: RuleChangeEvent = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "malformed rule change event");
                return;
            }
        };
        match event.kind.as_str() {
            "DELETE" => {
                self.state.lock().unwrap().remove(event.rule_id);
            }
            "ADD" | "UPDATE" => match self.fetch_row(event.rule_id).await {
                Ok(Some(rule)) if rule.enabled => {
                    self.state.lock().unwrap().upsert(rule);
                }
                Ok(_) => {
                    self.state.lock().unwrap().remove(event.rule_id);
                }
                Err(e) => tracing::error!(error = %e, rule_id = event.rule_id, "failed refetching rule"),
            },
            other => tracing::warn!(kind = other, "unknown rule change event type"),
        }
    }

    async fn run_poller(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sync_interval) => {}
                _ = self.cancel.cancelled() => return,
            }
            if let Err(e) = self.poll_once().await {
                tracing::error!(error = %e, "rule polling failed");
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
                    _ = self.cancel.cancelled() => return,
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), DataError> {
        let row = sqlx::query("SELECT max(updated_at) AS latest FROM rules")
            .fetch_one(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        let latest: Option<DateTime<Utc>> = row.try_get("latest").map_err(SqlxErrorExt::into_data_error)?;
        let last_synced_at = self.state.lock().unwrap().last_synced_at;
        if let Some(latest) = latest {
            if latest > last_synced_at {
                self.load_initial().await?;
            }
        }
        Ok(())
    }

    /// Cancel and await the listener and poller tasks.
    pub async fn stop_sync(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Pings Redis to validate the connection at bootstrap.
pub async fn ping_redis(client: &redis::Client) -> Result<(), DataError> {
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(DataError::database)?;
    let _: String = conn.ping().await.map_err(DataError::database)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::{Action, Logic, Rule, RuleGroup, RuleNode};
    use serde_json::json;

    fn rule(id: i64, fid: i64, target_type: TargetType, priority: i64) -> Rule {
        Rule {
            id,
            fid,
            target_type,
            name: format!("rule-{id}"),
            enabled: true,
            priority,
            block: false,
            trigger: RuleNode::Group(RuleGroup {
                logic: Logic::And,
                conditions: Vec::new(),
            }),
            actions: vec![Action {
                kind: "flag".into(),
                params: json!({}),
            }],
        }
    }

    fn repo_for_test() -> RuleRepository {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/review_test")
            .expect("lazy pool never touches the network");
        let redis = redis::Client::open("redis://localhost/0").expect("valid redis url");
        RuleRepository::new(pool, redis, "rules:changes".into(), std::time::Duration::from_secs(30))
    }

    #[test]
    fn state_rebuild_index_sorts_ascending_by_priority_then_id() {
        let mut state = State::empty();
        state.rules = vec![
            rule(3, 1, TargetType::Thread, 5),
            rule(1, 1, TargetType::Thread, 1),
            rule(2, 1, TargetType::Thread, 1),
        ];
        state.rebuild_index();
        let scoped = state.by_scope.get(&(1, TargetType::Thread)).unwrap();
        let ids: Vec<i64> = scoped.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn query_merges_scoped_rules_with_all_target_bucket() {
        let repo = repo_for_test();
        {
            let mut state = repo.state.lock().unwrap();
            state.rules = vec![
                rule(1, 7, TargetType::Thread, 10),
                rule(2, 7, TargetType::All, 5),
                rule(3, 8, TargetType::Thread, 1),
            ];
            state.rebuild_index();
        }

        let matched = repo.query(7, TargetType::Thread);
        let ids: Vec<i64> = matched.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let other_scope = repo.query(8, TargetType::Thread);
        assert_eq!(other_scope.len(), 1);
        assert_eq!(other_scope[0].id, 3);
    }

    #[tokio::test]
    async fn query_for_all_target_does_not_duplicate_all_bucket() {
        let repo = repo_for_test();
        {
            let mut state = repo.state.lock().unwrap();
            state.rules = vec![rule(1, 7, TargetType::All, 1)];
            state.rebuild_index();
        }
        let matched = repo.query(7, TargetType::All);
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn active_fids_deduplicates_and_sorts() {
        let repo = repo_for_test();
        {
            let mut state = repo.state.lock().unwrap();
            state.rules = vec![
                rule(1, 5, TargetType::Thread, 1),
                rule(2, 5, TargetType::Post, 1),
                rule(3, 2, TargetType::Thread, 1),
            ];
        }
        assert_eq!(repo.active_fids(), vec![2, 5]);
    }

    #[tokio::test]
    async fn handle_event_delete_removes_rule_from_state() {
        let repo = repo_for_test();
        {
            let mut state = repo.state.lock().unwrap();
            state.rules = vec![rule(1, 1, TargetType::Thread, 1)];
            state.rebuild_index();
        }
        repo.handle_event(r#"{"type":"DELETE","rule_id":1}"#).await;
        assert!(repo.active_fids().is_empty());
    }
}
