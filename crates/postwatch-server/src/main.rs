//! Postwatch - report pipeline entry point

use anyhow::Result;
use postwatch_common::config::{Config, LoggingConfig};
use postwatch_core::{
    AttemptRateLimiter, CredentialGuard, ImapTransport, IngestScheduler, IngestionPipeline,
};
use postwatch_storage::db::DatabasePool;
use postwatch_storage::repository::{
    DbAuditRepository, DbMailboxConfigRepository, DbReportRepository,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Postwatch...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // Run migrations
    db_pool.migrate().await?;

    // Repositories
    let mailboxes = Arc::new(DbMailboxConfigRepository::new(db_pool.clone()));
    let reports = Arc::new(DbReportRepository::new(db_pool.clone()));
    let audit = Arc::new(DbAuditRepository::new(db_pool.clone()));

    // Singletons shared by the scheduler
    let limiter = Arc::new(AttemptRateLimiter::new(config.rate_limit.clone()));
    let guard = Arc::new(CredentialGuard::new(&config.keys)?);
    info!(path = %config.keys.path.display(), "Credential guard ready");

    // Ingestion pipeline over IMAP
    let pipeline = Arc::new(IngestionPipeline::new(
        mailboxes.clone(),
        reports,
        audit,
        Arc::new(ImapTransport),
        config.ingest.clone(),
    ));

    // Start the polling scheduler
    let scheduler = Arc::new(IngestScheduler::new(
        mailboxes,
        pipeline,
        limiter,
        guard,
        config.scheduler.clone(),
    ));
    let scheduler_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler.run().await;
        })
    };

    info!("Postwatch started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler_handle.abort();

    info!("Postwatch shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
