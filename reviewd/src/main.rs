mod provider;

use std::sync::Arc;
use std::time::Duration;

use review_config::Settings;
use review_core::{FunctionRegistry, HybridProvider, LocalProvider, RuleEngine};
use review_data_sqlx::RuleRepository;
use review_observability::{LogFormat, ObservabilityConfig};
use review_rpc::RpcProvider;
use review_stream::{Dispatcher, WorkerManager, WorkerTemplate};

use provider::ActiveProvider;

#[tokio::main]
async fn main() {
    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("failed to load configuration: {e}");
        std::process::exit(1);
    });

    let log_format = if settings.log_format.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    let obs_config = ObservabilityConfig::new("reviewd")
        .with_log_format(log_format)
        .disable_tracing();
    let _otel_guard = review_observability::init_tracing(&obs_config);

    if let Err(e) = run(settings).await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url())
        .await?;

    let redis_client = redis::Client::open(settings.redis_url())?;
    review_data_sqlx::ping_redis(&redis_client).await?;

    let repo = Arc::new(RuleRepository::new(
        pool,
        redis_client.clone(),
        settings.redis_rules_channel.clone(),
        settings.rule_sync_interval,
    ));
    repo.load_initial().await?;
    tracing::info!(fids = ?repo.active_fids(), "loaded initial rule set");

    let registry = FunctionRegistry::new();
    review_core::functions::register_builtins(&registry);

    let provider = if settings.rpc_enabled {
        let rpc = RpcProvider::connect(settings.rpc_url.clone(), settings.rpc_timeout).await?;
        ActiveProvider::Hybrid(HybridProvider::new(registry, rpc))
    } else {
        ActiveProvider::Local(LocalProvider::new(registry))
    };
    let engine = Arc::new(RuleEngine::new(provider));

    let dispatcher = Arc::new(Dispatcher::new(
        redis_client.clone(),
        settings.redis_action_stream_key.clone(),
    ));

    let template = WorkerTemplate {
        base_stream_key: settings.redis_stream_key.clone(),
        consumer_group: settings.redis_consumer_group.clone(),
        consumer_name: settings.redis_consumer_name.clone(),
        batch_size: settings.batch_size,
        concurrency_limit: settings.worker_concurrency,
        block: Duration::from_millis(1000),
        enable_recovery: settings.enable_stream_recovery,
        recovery_interval: settings.stream_recovery_interval,
        min_idle_time: settings.stream_min_idle_time,
    };
    let manager = Arc::new(WorkerManager::new(
        Arc::clone(&repo),
        engine,
        dispatcher,
        redis_client,
        template,
    ));

    repo.start_sync();
    manager.start();

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining workers");

    manager.stop().await;
    repo.stop_sync().await;
    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
