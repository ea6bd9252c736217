//! Ingestion scheduler
//!
//! Periodic driver for the ingestion pipeline: walks all active mailbox
//! configurations, decrypts each stored password, and runs a polling
//! pass, gated by the attempt rate limiter. One config failing never
//! stops the pass.

use std::sync::Arc;

use postwatch_common::config::SchedulerConfig;
use postwatch_storage::repository::MailboxConfigRepository;
use tokio::time::{interval, sleep, Duration};
use tracing::{error, info, warn};

use crate::ingest::IngestionPipeline;
use crate::ratelimit::{AttemptRateLimiter, LimitDecision};
use crate::secrets::CredentialGuard;

/// Outcome counts of one full polling pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub configs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct IngestScheduler {
    mailboxes: Arc<dyn MailboxConfigRepository>,
    pipeline: Arc<IngestionPipeline>,
    limiter: Arc<AttemptRateLimiter>,
    guard: Arc<CredentialGuard>,
    config: SchedulerConfig,
}

impl IngestScheduler {
    pub fn new(
        mailboxes: Arc<dyn MailboxConfigRepository>,
        pipeline: Arc<IngestionPipeline>,
        limiter: Arc<AttemptRateLimiter>,
        guard: Arc<CredentialGuard>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            mailboxes,
            pipeline,
            limiter,
            guard,
            config,
        }
    }

    /// Run polling passes forever
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs));
        info!(
            interval_secs = self.config.poll_interval_secs,
            "ingestion scheduler started"
        );

        loop {
            ticker.tick().await;
            let summary = self.run_once().await;
            info!(
                configs = summary.configs,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "polling pass finished"
            );
            self.limiter.purge_stale();
        }
    }

    /// One polling pass over all active mailbox configurations
    pub async fn run_once(&self) -> PassSummary {
        let configs = match self.mailboxes.list_active().await {
            Ok(configs) => configs,
            Err(e) => {
                error!(error = %e, "cannot list active mailbox configs");
                return PassSummary::default();
            }
        };

        let mut summary = PassSummary {
            configs: configs.len(),
            ..Default::default()
        };

        for (idx, mailbox) in configs.iter().enumerate() {
            if idx > 0 {
                sleep(Duration::from_secs(self.config.inter_config_delay_secs)).await;
            }

            if let LimitDecision::Limited {
                reason,
                retry_after_secs,
            } = self.limiter.try_acquire(mailbox.owner_id)
            {
                warn!(
                    mailbox = %mailbox.name,
                    owner = %mailbox.owner_id,
                    reason,
                    retry_after_secs,
                    "skipping mailbox, owner is rate limited"
                );
                summary.skipped += 1;
                continue;
            }

            let password = match self
                .guard
                .decrypt(&mailbox.password_encrypted, &mailbox.encryption_key_id)
            {
                Ok(password) => password,
                Err(e) => {
                    error!(mailbox = %mailbox.name, error = %e, "cannot decrypt mailbox password");
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.pipeline.run(mailbox, &password).await {
                Ok(run) => {
                    self.limiter
                        .record_outcome(mailbox.owner_id, true, &mailbox.name);
                    info!(
                        mailbox = %mailbox.name,
                        processed = run.processed,
                        errors = run.errors,
                        duplicates = run.duplicates,
                        "mailbox polled"
                    );
                    summary.succeeded += 1;
                }
                Err(e) => {
                    self.limiter
                        .record_outcome(mailbox.owner_id, false, &mailbox.name);
                    error!(mailbox = %mailbox.name, error = %e, "mailbox polling failed");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
