use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use peerwarden::cache::CacheStore;
use peerwarden::config::Config;
use peerwarden::dispatcher::ActionDispatcher;
use peerwarden::gateway::{HttpRpcGateway, RpcGateway};
use peerwarden::geolocation::GeoLookupService;
use peerwarden::output::{self, AuditQueue, OutputFormat, OutputHandler};
use peerwarden::repository::{RuleRepository, SqliteRuleRepository};
use peerwarden::scheduler::Scheduler;
use peerwarden::snapshot::PeerSnapshotProvider;

/// Main daemon entry point for the peer-management engine
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting peerwarden daemon...");

    // Load configuration
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    };

    // Setup graceful shutdown signal handling
    let shutdown = Arc::new(AtomicBool::new(false));
    let s = Arc::clone(&shutdown);

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        s.store(true, Ordering::SeqCst);
    })?;

    // Storage: rules, execution logs
    let repository: Arc<dyn RuleRepository> =
        Arc::new(SqliteRuleRepository::new(&config.storage.database_path)?);
    let retention_cutoff = chrono::Utc::now().timestamp()
        - config.storage.log_retention_days * 86_400;
    match repository.prune_logs(retention_cutoff) {
        Ok(0) => {}
        Ok(n) => log::info!("Pruned {} old execution log entries", n),
        Err(e) => log::warn!("Log pruning failed: {}", e),
    }

    // Gateway and cache: the only paths to the node
    let gateway: Arc<dyn RpcGateway> = Arc::new(HttpRpcGateway::new(&config.rpc));
    let cache = Arc::new(CacheStore::new());

    let geo = if config.geolocation.enabled {
        Some(GeoLookupService::new(&config.geolocation))
    } else {
        None
    };

    let provider = PeerSnapshotProvider::new(
        Arc::clone(&gateway),
        Arc::clone(&cache),
        geo,
        config.cache.clone(),
    );

    // Audit trail
    let output_format = OutputFormat::from_str(&config.output.format);
    let output_handler = OutputHandler::new(output_format, config.output.file_path.clone())?;
    let (audit, audit_rx) = AuditQueue::channel();
    let audit_task = tokio::spawn(output::run_audit_writer(output_handler, audit_rx));

    let dispatcher = ActionDispatcher::new(
        Arc::clone(&gateway),
        Arc::clone(&repository),
        config.engine.cooldown_seconds,
        config.engine.default_ban_seconds,
    )
    .with_audit(audit);

    let scheduler = Arc::new(Scheduler::new(
        provider,
        Arc::clone(&repository),
        dispatcher,
        config.engine.tick_interval_seconds,
    ));

    log::info!(
        "Engine running against {} (tick {}s, cool-down {}s). Press Ctrl+C to stop.",
        config.rpc.url,
        config.engine.tick_interval_seconds,
        config.engine.cooldown_seconds
    );

    // The control loop owns this task until shutdown
    Arc::clone(&scheduler).run(Arc::clone(&shutdown)).await;

    // Teardown: no dangling fetches, flushed audit stream. Dropping the
    // scheduler releases the audit sender, which ends the writer task.
    cache.flush();
    drop(scheduler);
    audit_task.await?;
    log::info!("peerwarden daemon stopped");
    Ok(())
}
